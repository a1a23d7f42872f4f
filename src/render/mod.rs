//! Frame recording.
//!
//! The frame callback doesn't touch the GPU. Each context call is turned
//! into a [`FrameCommand`] with every shader variable already resolved, and
//! the finished [`Frame`] is handed to a [`RenderBackend`] which executes the
//! commands in order.

pub mod context;

use std::sync::Arc;

use glam::Vec4;
use parking_lot::Mutex;

pub use context::{DrawOptions, RenderContext};

use crate::error::BackendError;
use crate::resources::{BufferHandle, RenderTargetHandle, ResourceTable};
use crate::scene::SceneMesh;
use crate::shader::BoundShader;
use crate::state::PipelineState;
use crate::view::ViewInfo;

/// A colour target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    BackBuffer,
    RenderTarget(RenderTargetHandle),
}

/// Depth buffer for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthTarget {
    Default,
    None,
}

#[derive(Debug, Clone)]
pub enum MeshRef {
    Sphere,
    Cube,
    Plane,
    FullscreenQuad,
    Scene(Arc<SceneMesh>),
}

impl PartialEq for MeshRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MeshRef::Scene(a), MeshRef::Scene(b)) => Arc::ptr_eq(a, b),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    Scene,
    Sphere,
    FullscreenQuad,
    WireSphere,
}

/// One mesh drawn with a fully bound shader pair.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub mesh: MeshRef,
    pub vertex: BoundShader,
    pub pixel: Option<BoundShader>,
}

#[derive(Debug, Clone)]
pub struct DrawCall {
    pub kind: DrawKind,
    pub items: Vec<DrawItem>,
    pub pipeline: PipelineState,
    pub targets: Vec<TargetRef>,
    pub depth_buffer: DepthTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGroups {
    Direct([u32; 3]),
    /// Group counts read from a buffer at a byte offset.
    Indirect { buffer: BufferHandle, offset: u32 },
}

#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub shader: BoundShader,
    pub groups: DispatchGroups,
}

#[derive(Debug, Clone)]
pub enum FrameCommand {
    Clear { colour: Vec4, targets: Vec<TargetRef> },
    Draw(DrawCall),
    Dispatch(DispatchCall),
}

impl FrameCommand {
    pub fn name(&self) -> &'static str {
        match self {
            FrameCommand::Clear { .. } => "clear",
            FrameCommand::Draw(draw) => match draw.kind {
                DrawKind::Scene => "draw_scene",
                DrawKind::Sphere => "draw_sphere",
                DrawKind::FullscreenQuad => "draw_fullscreen_quad",
                DrawKind::WireSphere => "draw_wire_sphere",
            },
            FrameCommand::Dispatch(call) => match call.groups {
                DispatchGroups::Direct(_) => "dispatch",
                DispatchGroups::Indirect { .. } => "dispatch_indirect",
            },
        }
    }
}

/// Everything one tick recorded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub view: ViewInfo,
    pub commands: Vec<FrameCommand>,
}

impl Frame {
    /// A frame with the initial black clear of the back buffer.
    pub fn begin(view: ViewInfo) -> Self {
        Self {
            view,
            commands: vec![FrameCommand::Clear {
                colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
                targets: vec![TargetRef::BackBuffer],
            }],
        }
    }
}

pub trait RenderBackend: Send {
    fn submit(&mut self, frame: &Frame, resources: &ResourceTable) -> Result<(), BackendError>;
}

/// Keeps submitted frames for inspection. Shareable so a test can hold on to
/// it while the session owns a clone.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.frames.lock().last().cloned()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl RenderBackend for RecordingBackend {
    fn submit(&mut self, frame: &Frame, _resources: &ResourceTable) -> Result<(), BackendError> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_starts_with_black_clear() {
        let frame = Frame::begin(ViewInfo::default());
        match &frame.commands[..] {
            [FrameCommand::Clear { colour, targets }] => {
                assert_eq!(*colour, Vec4::new(0.0, 0.0, 0.0, 1.0));
                assert_eq!(targets, &[TargetRef::BackBuffer]);
            }
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn test_recording_backend_shares_frames() {
        let backend = RecordingBackend::new();
        let mut handle = backend.clone();
        handle
            .submit(&Frame::begin(ViewInfo::default()), &ResourceTable::new())
            .unwrap();
        assert_eq!(backend.frame_count(), 1);
        assert_eq!(backend.last_frame().unwrap().commands[0].name(), "clear");
    }
}
