//! wgpu execution of recorded frames.

pub mod backend;
pub mod mesh;
pub mod pipeline;

pub use backend::{request_device, WgpuBackend, BACK_BUFFER_FORMAT, DEPTH_FORMAT};
