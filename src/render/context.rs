//! The context handed to the frame callback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use parking_lot::Mutex;
use rhai::Map;

use crate::error::{CompileError, ScriptError};
use crate::logging::{LogCategory, Logger, OnceFilter};
use crate::render::{
    DepthTarget, DispatchCall, DispatchGroups, DrawCall, DrawItem, DrawKind, FrameCommand, MeshRef, TargetRef,
};
use crate::resources::{BufferHandle, ResourceTable};
use crate::scene::{PrimitiveType, Scene};
use crate::shader::binding::{DrawTarget, ResolveContext};
use crate::shader::variable::ShaderValue;
use crate::shader::{BoundShader, CompiledShader, Shader, ShaderCompiler, ShaderSource, ShaderStage};
use crate::state::{BlendState, DepthStencilState, PipelineState, RastState};
use crate::view::ViewInfo;
use crate::workspace::Workspace;

const WIRE_SHADER: &str = include_str!("wire.wgsl");

/// Shaders the context itself draws with.
pub struct BuiltinShaders {
    wire_vs: Arc<CompiledShader>,
    wire_ps: Arc<CompiledShader>,
}

impl BuiltinShaders {
    pub fn compile(compiler: &ShaderCompiler) -> Result<Self, CompileError> {
        let source = ShaderSource::Inline(WIRE_SHADER.to_string());
        let defines = Default::default();
        Ok(Self {
            wire_vs: compiler.compile(&source, "vs_main", "vs", &defines)?,
            wire_ps: compiler.compile(&source, "ps_main", "ps", &defines)?,
        })
    }
}

/// Optional arguments of the draw calls.
#[derive(Debug, Clone, Default)]
pub struct DrawOptions {
    pub pipeline: PipelineState,
    /// `None` means the back buffer.
    pub targets: Option<Vec<TargetRef>>,
    /// `None` means the default depth buffer (no depth buffer for quads).
    pub depth_buffer: Option<DepthTarget>,
    pub overrides: Map,
}

/// What a frame is recorded against, besides the view.
#[derive(Clone)]
pub struct FrameEnv {
    pub logger: Arc<dyn Logger>,
    pub once: Arc<OnceFilter>,
    pub workspace: Arc<dyn Workspace>,
    pub builtins: Option<Arc<BuiltinShaders>>,
}

struct Recorder {
    view: ViewInfo,
    scene: Option<Arc<Scene>>,
    resources: Arc<ResourceTable>,
    env: FrameEnv,
    commands: Mutex<Vec<FrameCommand>>,
}

#[derive(Clone)]
pub struct RenderContext {
    inner: Arc<Recorder>,
}

fn check_stage(shader: &Shader, expected: ShaderStage, call: &str) -> Result<(), ScriptError> {
    if shader.stage() == expected {
        return Ok(());
    }
    let compiled = shader.compiled();
    Err(ScriptError::api(format!(
        "{call}: {}({}) is a {:?} shader, expected {expected:?}",
        compiled.label,
        compiled.entry_point,
        shader.stage()
    )))
}

fn targets_or_back_buffer(targets: Option<Vec<TargetRef>>) -> Vec<TargetRef> {
    targets.unwrap_or_else(|| vec![TargetRef::BackBuffer])
}

impl RenderContext {
    pub fn new(view: ViewInfo, scene: Option<Arc<Scene>>, resources: Arc<ResourceTable>, env: FrameEnv) -> Self {
        Self {
            inner: Arc::new(Recorder {
                view,
                scene,
                resources,
                env,
                commands: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn view(&self) -> &ViewInfo {
        &self.inner.view
    }

    /// Take the commands recorded so far.
    pub fn finish(&self) -> Vec<FrameCommand> {
        std::mem::take(&mut *self.inner.commands.lock())
    }

    fn push(&self, command: FrameCommand) {
        self.inner.commands.lock().push(command);
    }

    fn warn_once(&self, message: &str) {
        self.inner
            .env
            .once
            .warn_once(self.inner.env.logger.as_ref(), LogCategory::Render, message);
    }

    fn bind(&self, shader: &Shader, target: Option<DrawTarget>, overrides: &Map) -> Result<BoundShader, ScriptError> {
        let workspace = &self.inner.env.workspace;
        let resolve_path = |p: &Path| -> PathBuf { workspace.get_absolute_path(p) };
        let ctx = ResolveContext {
            view: &self.inner.view,
            target,
            overrides,
            logger: self.inner.env.logger.as_ref(),
            once: &self.inner.env.once,
            resolve_path: &resolve_path,
        };
        Ok(shader.bind_for_draw(&ctx)?)
    }

    fn bind_pair(
        &self,
        vs: &Shader,
        ps: Option<&Shader>,
        target: Option<DrawTarget>,
        overrides: &Map,
    ) -> Result<(BoundShader, Option<BoundShader>), ScriptError> {
        let vertex = self.bind(vs, target, overrides)?;
        let pixel = ps.map(|ps| self.bind(ps, target, overrides)).transpose()?;
        Ok((vertex, pixel))
    }

    fn check_pair(&self, vs: &Shader, ps: Option<&Shader>, call: &str) -> Result<(), ScriptError> {
        check_stage(vs, ShaderStage::Vertex, call)?;
        if let Some(ps) = ps {
            check_stage(ps, ShaderStage::Fragment, call)?;
        }
        Ok(())
    }

    pub fn clear(&self, colour: Vec4, targets: Option<Vec<TargetRef>>) {
        self.push(FrameCommand::Clear {
            colour,
            targets: targets_or_back_buffer(targets),
        });
    }

    /// Draw every primitive of the scene.
    pub fn draw_scene(&self, vs: &Shader, ps: Option<&Shader>, options: DrawOptions) -> Result<(), ScriptError> {
        self.check_pair(vs, ps, "draw_scene")?;
        let Some(scene) = &self.inner.scene else {
            self.warn_once("draw_scene: no scene loaded; nothing drawn.");
            return Ok(());
        };

        let mut items = Vec::new();
        for primitive in scene.primitives() {
            let mesh = match &primitive.kind {
                PrimitiveType::Sphere => MeshRef::Sphere,
                PrimitiveType::Cube => MeshRef::Cube,
                PrimitiveType::Plane => MeshRef::Plane,
                PrimitiveType::Mesh(name) => match scene.mesh(name) {
                    Some(mesh) => MeshRef::Scene(mesh),
                    None => {
                        self.warn_once(&format!("Mesh '{name}' not found in scene; primitive skipped."));
                        continue;
                    }
                },
            };
            let material = primitive.material.as_deref().and_then(|name| {
                let material = scene.material(name);
                if material.is_none() {
                    self.warn_once(&format!("Material '{name}' not found in scene."));
                }
                material
            });
            let target = DrawTarget {
                local_to_world: primitive.local_to_world(),
                material: material.as_deref(),
            };
            let (vertex, pixel) = self.bind_pair(vs, ps, Some(target), &options.overrides)?;
            items.push(DrawItem { mesh, vertex, pixel });
        }

        self.push(FrameCommand::Draw(DrawCall {
            kind: DrawKind::Scene,
            items,
            pipeline: options.pipeline,
            targets: targets_or_back_buffer(options.targets),
            depth_buffer: options.depth_buffer.unwrap_or(DepthTarget::Default),
        }));
        Ok(())
    }

    /// Draw the built-in unit sphere at the origin.
    pub fn draw_sphere(&self, vs: &Shader, ps: Option<&Shader>, options: DrawOptions) -> Result<(), ScriptError> {
        self.check_pair(vs, ps, "draw_sphere")?;
        let target = DrawTarget {
            local_to_world: Mat4::IDENTITY,
            material: None,
        };
        let (vertex, pixel) = self.bind_pair(vs, ps, Some(target), &options.overrides)?;
        self.push(FrameCommand::Draw(DrawCall {
            kind: DrawKind::Sphere,
            items: vec![DrawItem {
                mesh: MeshRef::Sphere,
                vertex,
                pixel,
            }],
            pipeline: options.pipeline,
            targets: targets_or_back_buffer(options.targets),
            depth_buffer: options.depth_buffer.unwrap_or(DepthTarget::Default),
        }));
        Ok(())
    }

    /// Draw a quad covering the viewport. States in `options` are ignored;
    /// quads never test or write depth and never blend.
    pub fn draw_fullscreen_quad(
        &self,
        vs: &Shader,
        ps: Option<&Shader>,
        options: DrawOptions,
    ) -> Result<(), ScriptError> {
        self.check_pair(vs, ps, "draw_fullscreen_quad")?;
        let (vertex, pixel) = self.bind_pair(vs, ps, None, &options.overrides)?;
        self.push(FrameCommand::Draw(DrawCall {
            kind: DrawKind::FullscreenQuad,
            items: vec![DrawItem {
                mesh: MeshRef::FullscreenQuad,
                vertex,
                pixel,
            }],
            pipeline: PipelineState {
                rast: RastState::DEFAULT,
                depth: DepthStencilState::DISABLE_DEPTH,
                blend: BlendState::NO_BLENDING,
            },
            targets: targets_or_back_buffer(options.targets),
            depth_buffer: options.depth_buffer.unwrap_or(DepthTarget::None),
        }));
        Ok(())
    }

    pub fn dispatch(&self, cs: &Shader, groups: [u32; 3], overrides: &Map) -> Result<(), ScriptError> {
        check_stage(cs, ShaderStage::Compute, "dispatch")?;
        let shader = self.bind(cs, None, overrides)?;
        self.push(FrameCommand::Dispatch(DispatchCall {
            shader,
            groups: DispatchGroups::Direct(groups),
        }));
        Ok(())
    }

    pub fn dispatch_indirect(
        &self,
        cs: &Shader,
        buffer: BufferHandle,
        offset: u32,
        overrides: &Map,
    ) -> Result<(), ScriptError> {
        check_stage(cs, ShaderStage::Compute, "dispatch_indirect")?;
        let Some(desc) = self.inner.resources.buffer(buffer) else {
            return Err(ScriptError::api("dispatch_indirect: invalid argument buffer"));
        };
        if offset % 4 != 0 || offset as usize + 12 > desc.data.len() {
            return Err(ScriptError::api(format!(
                "dispatch_indirect: offset {offset} does not leave room for three aligned u32 arguments"
            )));
        }
        let shader = self.bind(cs, None, overrides)?;
        self.push(FrameCommand::Dispatch(DispatchCall {
            shader,
            groups: DispatchGroups::Indirect { buffer, offset },
        }));
        Ok(())
    }

    /// Debug overlay: a wireframe sphere. Overrides don't apply.
    pub fn draw_wire_sphere(
        &self,
        position: Vec3,
        radius: f32,
        colour: Vec4,
        target: Option<TargetRef>,
    ) -> Result<(), ScriptError> {
        let Some(builtins) = &self.inner.env.builtins else {
            self.warn_once("draw_wire_sphere: built-in wire shader unavailable.");
            return Ok(());
        };
        let vs = Shader::instantiate(builtins.wire_vs.clone());
        let ps = Shader::instantiate(builtins.wire_ps.clone());
        let colour = ShaderValue::Floats(colour.to_array().to_vec());
        vs.find_constant_variable("Colour").set(colour.clone());
        ps.find_constant_variable("Colour").set(colour);

        let target_prim = DrawTarget {
            local_to_world: Mat4::from_scale_rotation_translation(Vec3::splat(radius), Quat::IDENTITY, position),
            material: None,
        };
        let (vertex, pixel) = self.bind_pair(&vs, Some(&ps), Some(target_prim), &Map::new())?;
        self.push(FrameCommand::Draw(DrawCall {
            kind: DrawKind::WireSphere,
            items: vec![DrawItem {
                mesh: MeshRef::Sphere,
                vertex,
                pixel,
            }],
            pipeline: PipelineState {
                rast: RastState::WIREFRAME,
                depth: DepthStencilState::DISABLE_DEPTH_WRITE,
                blend: BlendState::DEFAULT,
            },
            targets: vec![target.unwrap_or(TargetRef::BackBuffer)],
            depth_buffer: DepthTarget::Default,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::logging::MemoryLogger;
    use crate::resources::{BufferDesc, RenderTargetHandle};
    use crate::scene::{Material, Primitive, Transform};
    use crate::workspace::DirectoryWorkspace;
    use std::collections::BTreeMap;

    const SOURCE: &str = r#"
struct Globals {
    WorldToProjectionMatrix: mat4x4<f32>,
    LocalToWorldMatrix: mat4x4<f32>,
    DiffuseColour: vec4<f32>,
};
@group(0) @binding(0) var<uniform> globals: Globals;

@group(0) @binding(1) var<storage, read_write> output: array<u32>;

@vertex
fn vs_main(@location(0) pos: vec3<f32>) -> @builtin(position) vec4<f32> {
    return globals.WorldToProjectionMatrix * globals.LocalToWorldMatrix * vec4<f32>(pos, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return globals.DiffuseColour;
}

@compute @workgroup_size(8)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    output[id.x] = id.x;
}
"#;

    struct Fixture {
        logger: Arc<MemoryLogger>,
        compiler: ShaderCompiler,
        resources: Arc<ResourceTable>,
    }

    impl Fixture {
        fn new() -> Self {
            let logger = Arc::new(MemoryLogger::new());
            Self {
                compiler: ShaderCompiler::new(logger.clone()),
                logger,
                resources: Arc::new(ResourceTable::new()),
            }
        }

        fn shader(&self, entry: &str, profile: &str) -> Shader {
            let compiled = self
                .compiler
                .compile(&ShaderSource::Inline(SOURCE.into()), entry, profile, &BTreeMap::new())
                .unwrap();
            Shader::instantiate(compiled)
        }

        fn context(&self, scene: Option<Arc<Scene>>) -> RenderContext {
            let env = FrameEnv {
                logger: self.logger.clone(),
                once: Arc::new(OnceFilter::new()),
                workspace: Arc::new(DirectoryWorkspace::new("/project")),
                builtins: BuiltinShaders::compile(&self.compiler).ok().map(Arc::new),
            };
            RenderContext::new(ViewInfo::default(), scene, self.resources.clone(), env)
        }
    }

    fn draw_of(command: &FrameCommand) -> &DrawCall {
        match command {
            FrameCommand::Draw(draw) => draw,
            other => panic!("expected a draw, got {}", other.name()),
        }
    }

    #[test]
    fn test_omitted_targets_equal_explicit_defaults() {
        let fx = Fixture::new();
        let (vs, ps) = (fx.shader("vs_main", "vs"), fx.shader("ps_main", "ps"));
        let ctx = fx.context(None);

        ctx.draw_sphere(&vs, Some(&ps), DrawOptions::default()).unwrap();
        ctx.draw_sphere(
            &vs,
            Some(&ps),
            DrawOptions {
                targets: Some(vec![TargetRef::BackBuffer]),
                depth_buffer: Some(DepthTarget::Default),
                ..Default::default()
            },
        )
        .unwrap();

        let commands = ctx.finish();
        let (a, b) = (draw_of(&commands[0]), draw_of(&commands[1]));
        assert_eq!(a.targets, b.targets);
        assert_eq!(a.depth_buffer, b.depth_buffer);
        assert_eq!(a.pipeline, b.pipeline);
        assert_eq!(a.pipeline, PipelineState::default());
    }

    #[test]
    fn test_commands_keep_call_order() {
        let fx = Fixture::new();
        let (vs, ps, cs) = (
            fx.shader("vs_main", "vs"),
            fx.shader("ps_main", "ps"),
            fx.shader("cs_main", "cs"),
        );
        let ctx = fx.context(None);
        let rt = TargetRef::RenderTarget(RenderTargetHandle(0));

        ctx.clear(Vec4::ONE, Some(vec![rt]));
        ctx.draw_fullscreen_quad(&vs, Some(&ps), DrawOptions::default()).unwrap();
        ctx.dispatch(&cs, [4, 1, 1], &Map::new()).unwrap();
        ctx.draw_wire_sphere(Vec3::ZERO, 2.0, Vec4::ONE, None).unwrap();

        let names: Vec<&str> = ctx.finish().iter().map(FrameCommand::name).collect();
        assert_eq!(
            names,
            ["clear", "draw_fullscreen_quad", "dispatch", "draw_wire_sphere"]
        );
    }

    #[test]
    fn test_quad_has_no_depth_and_wire_sphere_is_wireframe() {
        let fx = Fixture::new();
        let (vs, ps) = (fx.shader("vs_main", "vs"), fx.shader("ps_main", "ps"));
        let ctx = fx.context(None);
        ctx.draw_fullscreen_quad(&vs, Some(&ps), DrawOptions::default()).unwrap();
        ctx.draw_wire_sphere(Vec3::new(1.0, 0.0, 0.0), 0.5, Vec4::ONE, None).unwrap();

        let commands = ctx.finish();
        let quad = draw_of(&commands[0]);
        assert_eq!(quad.depth_buffer, DepthTarget::None);
        assert_eq!(quad.pipeline.depth, DepthStencilState::DISABLE_DEPTH);

        let wire = draw_of(&commands[1]);
        assert_eq!(wire.pipeline.rast, RastState::WIREFRAME);
        assert_eq!(wire.pipeline.depth, DepthStencilState::DISABLE_DEPTH_WRITE);
        assert_eq!(wire.targets, vec![TargetRef::BackBuffer]);
    }

    #[test]
    fn test_wrong_stage_is_rejected() {
        let fx = Fixture::new();
        let (vs, ps) = (fx.shader("vs_main", "vs"), fx.shader("ps_main", "ps"));
        let ctx = fx.context(None);
        let err = ctx.draw_sphere(&ps, Some(&vs), DrawOptions::default()).unwrap_err();
        assert!(matches!(err, ScriptError::Api(_)));
        assert!(ctx.finish().is_empty());
    }

    #[test]
    fn test_draw_scene_binds_per_primitive() {
        let fx = Fixture::new();
        let (vs, ps) = (fx.shader("vs_main", "vs"), fx.shader("ps_main", "ps"));
        ps.find_constant_variable("DiffuseColour")
            .bind(crate::shader::binding::BindSource::Material {
                param: "DiffuseColour".into(),
            });

        let scene = Arc::new(Scene::new());
        scene.add_material(Material::new("Red").with_param("DiffuseColour", Vec4::new(1.0, 0.0, 0.0, 1.0)));
        scene.add_primitive(Primitive::new(PrimitiveType::Sphere, Transform::default(), Some("Red")));
        scene.add_primitive(Primitive::new(
            PrimitiveType::Mesh("teapot".into()),
            Transform::default(),
            None,
        ));
        let ctx = fx.context(Some(scene));

        ctx.draw_scene(&vs, Some(&ps), DrawOptions::default()).unwrap();
        let commands = ctx.finish();
        let draw = draw_of(&commands[0]);
        assert_eq!(draw.items.len(), 1);
        let pixel = draw.items[0].pixel.as_ref().unwrap();
        let bytes = &pixel.constant_buffers[0].bytes;
        assert_eq!(&bytes[128..132], &1.0f32.to_le_bytes());
        assert!(fx.logger.contains("Mesh 'teapot' not found"));
    }

    #[test]
    fn test_dispatch_indirect_validates_buffer() {
        let fx = Fixture::new();
        let cs = fx.shader("cs_main", "cs");
        let buffer = fx
            .resources
            .create_buffer(BufferDesc {
                element_count: 3,
                format: Format::R32_Float,
                data: vec![0; 12],
                uav: false,
            })
            .unwrap();
        let ctx = fx.context(None);

        ctx.dispatch_indirect(&cs, buffer, 0, &Map::new()).unwrap();
        assert!(ctx.dispatch_indirect(&cs, buffer, 4, &Map::new()).is_err());
        assert!(ctx
            .dispatch_indirect(&cs, BufferHandle(9), 0, &Map::new())
            .is_err());
    }
}
