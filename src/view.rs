//! Per-frame view state: the camera matrices and viewport the host renders
//! with, and the matrix helpers semantic bindings are computed from.

use glam::{Mat4, Vec3};

/// Inverse of `m`, or identity when `m` is singular.
pub fn inverse_or_identity(m: &Mat4) -> Mat4 {
    let det = m.determinant();
    if det.abs() <= f32::EPSILON || !det.is_finite() {
        Mat4::IDENTITY
    } else {
        m.inverse()
    }
}

/// A host camera. With `target` set it looks at the target, otherwise it is
/// oriented by `rotation` (pitch, yaw, roll in radians).
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Vec3,
    pub target: Option<Vec3>,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(4.0, 2.0, 4.0),
            rotation: Vec3::ZERO,
            target: Some(Vec3::ZERO),
            up: Vec3::Y,
            fov: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        match self.target {
            Some(target) => Mat4::look_at_rh(self.position, target, self.up),
            None => {
                // YXZ keeps yaw independent of pitch
                let [pitch, yaw, roll] = self.rotation.to_array();
                let rotation = Mat4::from_euler(glam::EulerRot::YXZ, yaw, pitch, roll);
                rotation * Mat4::from_translation(-self.position)
            }
        }
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), aspect, self.near, self.far)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewInfo {
    pub world_to_view: Mat4,
    pub view_to_projection: Mat4,
    pub eye_position: Vec3,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl ViewInfo {
    pub fn from_camera(camera: &Camera, width: u32, height: u32) -> Self {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        Self {
            world_to_view: camera.view_matrix(),
            view_to_projection: camera.projection_matrix(aspect),
            eye_position: camera.position,
            viewport_width: width,
            viewport_height: height,
        }
    }

    pub fn world_to_projection(&self) -> Mat4 {
        self.view_to_projection * self.world_to_view
    }

    pub fn projection_to_world(&self) -> Mat4 {
        inverse_or_identity(&self.world_to_projection())
    }
}

impl Default for ViewInfo {
    fn default() -> Self {
        Self::from_camera(&Camera::default(), 800, 600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_inverse_is_identity() {
        let singular = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(inverse_or_identity(&singular), Mat4::IDENTITY);

        let scale = Mat4::from_scale(Vec3::splat(2.0));
        let inv = inverse_or_identity(&scale);
        assert!((inv * scale).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_look_at_puts_target_in_front() {
        let camera = Camera::default();
        let origin_in_view = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!(origin_in_view.z < 0.0);
    }

    #[test]
    fn test_projection_round_trip() {
        let view = ViewInfo::default();
        let m = view.projection_to_world() * view.world_to_projection();
        assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-3));
    }
}
