//! Built-in meshes and the vertex layout every draw uses.

use std::f32::consts::PI;

use crate::scene::MeshVertex;

pub fn vertex_layout<'a>() -> wgpu::VertexBufferLayout<'a> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

const fn vertex(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> MeshVertex {
    MeshVertex { position, normal, uv }
}

/// Unit cube centred at the origin.
pub fn create_cube_geometry() -> (Vec<MeshVertex>, Vec<u32>) {
    // (normal, tangent u, tangent v) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                0.5 * (n[0] + su * u[0] + sv * v[0]),
                0.5 * (n[1] + su * u[1] + sv * v[1]),
                0.5 * (n[2] + su * u[2] + sv * v[2]),
            ];
            let uv = [(su + 1.0) * 0.5, (1.0 - sv) * 0.5];
            vertices.push(vertex(position, n, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

/// Unit plane in XZ facing +Y.
pub fn create_plane_geometry() -> (Vec<MeshVertex>, Vec<u32>) {
    let up = [0.0, 1.0, 0.0];
    let vertices = vec![
        vertex([-0.5, 0.0, 0.5], up, [0.0, 1.0]),
        vertex([0.5, 0.0, 0.5], up, [1.0, 1.0]),
        vertex([0.5, 0.0, -0.5], up, [1.0, 0.0]),
        vertex([-0.5, 0.0, -0.5], up, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

/// Sphere of radius 1 at the origin, 16 rings by 32 segments.
pub fn create_sphere_geometry() -> (Vec<MeshVertex>, Vec<u32>) {
    let lat_segments = 16u32;
    let lon_segments = 32u32;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for lat in 0..=lat_segments {
        let theta = PI * lat as f32 / lat_segments as f32;
        for lon in 0..=lon_segments {
            let phi = 2.0 * PI * lon as f32 / lon_segments as f32;
            let normal = [phi.cos() * theta.sin(), theta.cos(), phi.sin() * theta.sin()];
            let uv = [lon as f32 / lon_segments as f32, lat as f32 / lat_segments as f32];
            vertices.push(vertex(normal, normal, uv));
        }
    }

    for lat in 0..lat_segments {
        for lon in 0..lon_segments {
            let first = lat * (lon_segments + 1) + lon;
            let second = first + lon_segments + 1;
            indices.extend_from_slice(&[first, first + 1, second, second, first + 1, second + 1]);
        }
    }

    (vertices, indices)
}

/// Two triangles covering clip space, uv (0,0) at the top left.
pub fn create_fullscreen_quad_geometry() -> (Vec<MeshVertex>, Vec<u32>) {
    let back = [0.0, 0.0, -1.0];
    let vertices = vec![
        vertex([-1.0, -1.0, 0.0], back, [0.0, 1.0]),
        vertex([1.0, -1.0, 0.0], back, [1.0, 1.0]),
        vertex([1.0, 1.0, 0.0], back, [1.0, 0.0]),
        vertex([-1.0, 1.0, 0.0], back, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

/// Edge list for line drawing: each triangle contributes its three edges.
pub fn triangle_edges(indices: &[u32]) -> Vec<u32> {
    indices
        .chunks_exact(3)
        .flat_map(|t| [t[0], t[1], t[1], t[2], t[2], t[0]])
        .collect()
}
