//! The scene the render script draws: primitives with transforms and
//! materials, named meshes, and free-form lights.
//!
//! The scene is owned by the host. Scripts and the render context only read
//! it; edits come from the host or through the primitives' transform
//! properties. Every change is reported on one aggregate notifier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use parking_lot::{Mutex, RwLock};

use crate::observable::{Callback, ChangeNotifier, Subscription};
use crate::property::{struct_property, CompositeProperty, StructField, UserProperty};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Sphere,
    Cube,
    Plane,
    /// A mesh from the scene's mesh table.
    Mesh(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, applied yaw (y), pitch (x), roll (z).
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn local_to_world(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            glam::EulerRot::YXZ,
            self.rotation.y,
            self.rotation.x,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Material {
    pub name: String,
    pub params: HashMap<String, Vec4>,
    /// Texture parameter name to file path.
    pub textures: HashMap<String, PathBuf>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Vec4) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.textures.insert(name.into(), path.into());
        self
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneMesh {
    pub name: String,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Directional,
    Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub colour: Vec3,
}

pub struct Primitive {
    pub kind: PrimitiveType,
    pub material: Option<String>,
    transform: Arc<Mutex<Transform>>,
    position: Arc<CompositeProperty>,
    rotation: Arc<CompositeProperty>,
    scale: Arc<CompositeProperty>,
}

impl Primitive {
    pub fn new(kind: PrimitiveType, transform: Transform, material: Option<&str>) -> Self {
        let cell = Arc::new(Mutex::new(transform));
        let make = |name: &str, fields: Vec<StructField<Transform>>| {
            let (r, w) = (cell.clone(), cell.clone());
            Arc::new(struct_property(
                name,
                Arc::new(move || *r.lock()),
                Arc::new(move |t: Transform| *w.lock() = t),
                fields,
            ))
        };

        let position = make(
            "Position",
            vec![
                StructField { name: "x", get: |t: &Transform| t.position.x, set: |t: &mut Transform, v| t.position.x = v },
                StructField { name: "y", get: |t: &Transform| t.position.y, set: |t: &mut Transform, v| t.position.y = v },
                StructField { name: "z", get: |t: &Transform| t.position.z, set: |t: &mut Transform, v| t.position.z = v },
            ],
        );
        let rotation = make(
            "Rotation",
            vec![
                StructField { name: "x", get: |t: &Transform| t.rotation.x, set: |t: &mut Transform, v| t.rotation.x = v },
                StructField { name: "y", get: |t: &Transform| t.rotation.y, set: |t: &mut Transform, v| t.rotation.y = v },
                StructField { name: "z", get: |t: &Transform| t.rotation.z, set: |t: &mut Transform, v| t.rotation.z = v },
            ],
        );
        let scale = make(
            "Scale",
            vec![
                StructField { name: "x", get: |t: &Transform| t.scale.x, set: |t: &mut Transform, v| t.scale.x = v },
                StructField { name: "y", get: |t: &Transform| t.scale.y, set: |t: &mut Transform, v| t.scale.y = v },
                StructField { name: "z", get: |t: &Transform| t.scale.z, set: |t: &mut Transform, v| t.scale.z = v },
            ],
        );

        Self {
            kind,
            material: material.map(str::to_string),
            transform: cell,
            position,
            rotation,
            scale,
        }
    }

    pub fn transform(&self) -> Transform {
        *self.transform.lock()
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.transform().local_to_world()
    }

    pub fn properties(&self) -> Vec<Arc<dyn UserProperty>> {
        vec![
            self.position.clone() as Arc<dyn UserProperty>,
            self.rotation.clone(),
            self.scale.clone(),
        ]
    }

    pub fn subscribe(&self, callback: Callback) -> Subscription {
        Subscription::merge(
            self.properties()
                .iter()
                .map(|p| p.subscribe(callback.clone()))
                .collect(),
        )
    }
}

#[derive(Default)]
pub struct Scene {
    primitives: RwLock<Vec<Arc<Primitive>>>,
    meshes: RwLock<HashMap<String, Arc<SceneMesh>>>,
    materials: RwLock<HashMap<String, Arc<Material>>>,
    lights: RwLock<Vec<Light>>,
    changed: ChangeNotifier,
    forwarding: Mutex<Vec<Subscription>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sphere on a ground plane with one light; used when the host has no
    /// scene of its own.
    pub fn demo() -> Self {
        let scene = Scene::new();
        scene.add_material(
            Material::new("Default").with_param("DiffuseColour", Vec4::new(0.8, 0.8, 0.8, 1.0)),
        );
        scene.add_material(
            Material::new("Ground").with_param("DiffuseColour", Vec4::new(0.3, 0.35, 0.3, 1.0)),
        );
        scene.add_primitive(Primitive::new(
            PrimitiveType::Sphere,
            Transform::default(),
            Some("Default"),
        ));
        scene.add_primitive(Primitive::new(
            PrimitiveType::Plane,
            Transform {
                position: Vec3::new(0.0, -0.5, 0.0),
                scale: Vec3::splat(6.0),
                ..Default::default()
            },
            Some("Ground"),
        ));
        scene.add_light(Light {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            colour: Vec3::ONE,
        });
        scene
    }

    /// Add a primitive; its transform changes are forwarded to the scene's
    /// change stream.
    pub fn add_primitive(&self, primitive: Primitive) -> Arc<Primitive> {
        let primitive = Arc::new(primitive);
        let changed = self.changed.clone();
        let forward = primitive.subscribe(Arc::new(move || changed.notify()));
        self.forwarding.lock().push(forward);
        self.primitives.write().push(primitive.clone());
        self.changed.notify();
        primitive
    }

    pub fn add_material(&self, material: Material) {
        self.materials
            .write()
            .insert(material.name.clone(), Arc::new(material));
        self.changed.notify();
    }

    pub fn add_mesh(&self, mesh: SceneMesh) {
        self.meshes.write().insert(mesh.name.clone(), Arc::new(mesh));
        self.changed.notify();
    }

    pub fn add_light(&self, light: Light) {
        self.lights.write().push(light);
        self.changed.notify();
    }

    pub fn primitives(&self) -> Vec<Arc<Primitive>> {
        self.primitives.read().clone()
    }

    pub fn material(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.read().get(name).cloned()
    }

    pub fn mesh(&self, name: &str) -> Option<Arc<SceneMesh>> {
        self.meshes.read().get(name).cloned()
    }

    pub fn lights(&self) -> Vec<Light> {
        self.lights.read().clone()
    }

    pub fn subscribe(&self, callback: Callback) -> Subscription {
        self.changed.subscribe(callback)
    }
}
