//! The host API scripts call.
//!
//! Scripts get a `ri` object ([`RenderInterface`]) for compiling shaders,
//! creating resources and user variables and registering the frame callback.
//! The callback receives a [`RenderContext`] as `ctx`. Shader variables are
//! looked up on the shader objects `ri.compile_shader` returns:
//!
//! ```text
//! let vs = ri.compile_shader("scene.wgsl", "vs_main", "vs_5_0");
//! let ps = ri.compile_shader("scene.wgsl", "ps_main", "ps_5_0");
//! let radius = ri.add_user_var_float("Radius", 20.0);
//! ps.find_constant_variable("Radius").set(radius);
//! ri.set_frame_callback(|ctx| {
//!     ctx.clear([0.1, 0.1, 0.1, 1.0]);
//!     ctx.draw_scene(vs, ps, #{ blend_state: BlendState.alpha_blending });
//! });
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use glam::Vec3;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, Variant, INT};

use crate::coerce::{
    flatten_numbers, to_array, to_bool, to_colour, to_f32, to_f32_list, to_i64, to_map, to_shader_value,
    to_string, to_string_list, to_u32,
};
use crate::error::{ConversionError, ScriptError};
use crate::format::Format;
use crate::logging::LogCategory;
use crate::program::ProgramState;
use crate::render::{DepthTarget, DrawOptions, RenderContext, TargetRef};
use crate::resources::{
    buffer_byte_len, encode_elements, texture_byte_len, BufferDesc, BufferHandle, RenderTargetHandle, ResourceRef,
    TextureDesc, TextureHandle,
};
use crate::shader::binding::{BindSource, BindValue, SemanticBind};
use crate::shader::variable::{ConstantVariable, ResourceVariable, SamplerVariable, UavVariable};
use crate::shader::{Shader, ShaderSource};
use crate::state::{
    BlendInput, BlendOp, BlendState, ComparisonFunction, CullMode, DepthStencilState, FillMode, RastState,
    SamplerState, TextureAddressMode, TextureFilter,
};
use crate::user_vars::UserVar;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// The `ri` object.
#[derive(Clone)]
pub struct RenderInterface {
    state: Arc<ProgramState>,
}

impl RenderInterface {
    pub fn new(state: Arc<ProgramState>) -> Self {
        Self { state }
    }

    /// Resolve a script-supplied file name against the project.
    pub fn project_file(&self, name: &str) -> PathBuf {
        let workspace = &self.state.env.workspace;
        workspace
            .find_project_file(name)
            .unwrap_or_else(|| workspace.get_absolute_path(Path::new(name)))
    }

    pub fn compile_shader(
        &self,
        source: ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &Map,
    ) -> Result<Arc<Shader>, ScriptError> {
        let defines = to_defines(defines)?;
        let compiled = self.state.env.compiler.compile(&source, entry_point, profile, &defines)?;
        Ok(self.state.shader_for(compiled))
    }

    /// Options: `width`, `height` (default: viewport size) and `format`.
    pub fn create_render_target(&self, options: &Map) -> Result<RenderTargetHandle, ConversionError> {
        let config = &self.state.env.config;
        let mut width = config.width;
        let mut height = config.height;
        let mut format = Format::R8G8B8A8_UNorm;
        for (key, value) in options {
            match key.as_str() {
                "width" => width = to_u32(value)?,
                "height" => height = to_u32(value)?,
                "format" => format = Format::from_str(&to_string(value)?)?,
                other => return Err(unknown_option("render target option", other)),
            }
        }
        if width == 0 || height == 0 {
            return Err(ConversionError::Invalid("render target size must be non-zero".into()));
        }
        texture_byte_len(width, height, format)?;
        Ok(self.state.resources.create_render_target(width, height, format))
    }

    pub fn load_texture(&self, name: &str) -> ResourceRef {
        let path = self.project_file(name);
        if !path.is_file() {
            self.state
                .warn_once(LogCategory::Script, &format!("Texture file '{name}' not found."));
        }
        ResourceRef::File { path, mips: true }
    }

    pub fn add_user_var(&self, var: UserVar) -> UserVar {
        self.state.add_user_var(var)
    }

    pub fn set_frame_callback(&self, callback: FnPtr) {
        self.state.set_callback(callback);
    }

    /// Read-only snapshot of the scene's primitives and lights.
    pub fn scene_snapshot(&self) -> Map {
        let mut snapshot = Map::new();
        let (primitives, lights) = match &self.state.scene {
            Some(scene) => (
                scene
                    .primitives()
                    .iter()
                    .map(|p| {
                        let t = p.transform();
                        let mut m = Map::new();
                        m.insert("kind".into(), format!("{:?}", p.kind).into());
                        m.insert(
                            "material".into(),
                            p.material.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT),
                        );
                        m.insert("position".into(), vec3(t.position));
                        m.insert("rotation".into(), vec3(t.rotation));
                        m.insert("scale".into(), vec3(t.scale));
                        Dynamic::from(m)
                    })
                    .collect::<Array>(),
                scene
                    .lights()
                    .iter()
                    .map(|l| {
                        let mut m = Map::new();
                        m.insert("kind".into(), format!("{:?}", l.kind).into());
                        m.insert("position".into(), vec3(l.position));
                        m.insert("direction".into(), vec3(l.direction));
                        m.insert("colour".into(), vec3(l.colour));
                        Dynamic::from(m)
                    })
                    .collect::<Array>(),
            ),
            None => (Array::new(), Array::new()),
        };
        snapshot.insert("primitives".into(), primitives.into());
        snapshot.insert("lights".into(), lights.into());
        snapshot
    }

    fn warn_missing(&self, kind: &str, shader: &Shader, name: &str) {
        let compiled = shader.compiled();
        self.state.warn_once(
            LogCategory::Shader,
            &format!(
                "{kind} variable '{name}' not found in {}({}).",
                compiled.label, compiled.entry_point
            ),
        );
    }

    pub fn constant(&self, shader: &Shader, name: &str) -> ConstantVariable {
        let var = shader.find_constant_variable(name);
        if var.is_null() {
            self.warn_missing("Constant", shader, name);
        }
        var
    }

    pub fn resource(&self, shader: &Shader, name: &str) -> ResourceVariable {
        let var = shader.find_resource_variable(name);
        if var.is_null() {
            self.warn_missing("Resource", shader, name);
        }
        var
    }

    pub fn sampler(&self, shader: &Shader, name: &str) -> SamplerVariable {
        let var = shader.find_sampler_variable(name);
        if var.is_null() {
            self.warn_missing("Sampler", shader, name);
        }
        var
    }

    pub fn uav(&self, shader: &Shader, name: &str) -> UavVariable {
        let var = shader.find_uav_variable(name);
        if var.is_null() {
            self.warn_missing("UAV", shader, name);
        }
        var
    }
}

fn vec3(v: Vec3) -> Dynamic {
    Dynamic::from(vec![Dynamic::from(v.x), Dynamic::from(v.y), Dynamic::from(v.z)])
}

fn unknown_option(kind: &'static str, name: &str) -> ConversionError {
    ConversionError::UnknownName {
        kind,
        name: name.to_string(),
    }
}

fn cast<T: Variant + Clone>(value: &Dynamic, expected: &str) -> Result<T, ConversionError> {
    value
        .clone()
        .try_cast::<T>()
        .ok_or_else(|| ConversionError::mismatch(expected, value.type_name()))
}

fn to_defines(map: &Map) -> Result<BTreeMap<String, f64>, ConversionError> {
    map.iter()
        .map(|(name, value)| {
            let value = match value.as_int() {
                Ok(i) => i as f64,
                Err(_) => to_f32(value)? as f64,
            };
            Ok((name.to_string(), value))
        })
        .collect()
}

// ============================================================================
// Script value conversions
// ============================================================================

pub fn to_resource_ref(value: &Dynamic) -> Result<ResourceRef, ConversionError> {
    if let Some(r) = value.clone().try_cast::<ResourceRef>() {
        return Ok(r);
    }
    if let Some(h) = value.clone().try_cast::<TextureHandle>() {
        return Ok(ResourceRef::Texture(h));
    }
    if let Some(h) = value.clone().try_cast::<RenderTargetHandle>() {
        return Ok(ResourceRef::RenderTarget(h));
    }
    if let Some(h) = value.clone().try_cast::<BufferHandle>() {
        return Ok(ResourceRef::Buffer(h));
    }
    match value.clone().try_cast::<DepthTarget>() {
        Some(DepthTarget::Default) => Ok(ResourceRef::DefaultDepth),
        _ => Err(ConversionError::mismatch("texture, render target or buffer", value.type_name())),
    }
}

fn to_target(value: &Dynamic) -> Result<TargetRef, ConversionError> {
    if let Some(t) = value.clone().try_cast::<TargetRef>() {
        return Ok(t);
    }
    cast::<RenderTargetHandle>(value, "render target").map(TargetRef::RenderTarget)
}

/// `()` means the back buffer; a single target or an array of them.
pub fn to_targets(value: &Dynamic) -> Result<Option<Vec<TargetRef>>, ConversionError> {
    if value.is_unit() {
        return Ok(None);
    }
    match value.clone().try_cast::<Array>() {
        Some(array) => array.iter().map(to_target).collect::<Result<_, _>>().map(Some),
        None => Ok(Some(vec![to_target(value)?])),
    }
}

fn to_depth_target(value: &Dynamic) -> Result<DepthTarget, ConversionError> {
    cast::<DepthTarget>(value, "depth buffer")
}

fn to_optional_shader(value: &Dynamic) -> Result<Option<Arc<Shader>>, ConversionError> {
    if value.is_unit() {
        return Ok(None);
    }
    cast::<Arc<Shader>>(value, "shader").map(Some)
}

pub fn to_draw_options(map: &Map) -> Result<DrawOptions, ConversionError> {
    let mut options = DrawOptions::default();
    for (key, value) in map {
        if value.is_unit() {
            continue;
        }
        match key.as_str() {
            "rast_state" => options.pipeline.rast = cast(value, "RastState")?,
            "depth_state" => options.pipeline.depth = cast(value, "DepthStencilState")?,
            "blend_state" => options.pipeline.blend = cast(value, "BlendState")?,
            "targets" => options.targets = to_targets(value)?,
            "depth_buffer" => options.depth_buffer = Some(to_depth_target(value)?),
            "overrides" => options.overrides = to_map(value)?,
            other => return Err(unknown_option("draw option", other)),
        }
    }
    Ok(options)
}

// ============================================================================
// State objects built from maps
// ============================================================================

fn enum_field<T>(value: &Dynamic, kind: &'static str, parse: fn(&str) -> Option<T>) -> Result<T, ConversionError> {
    let name = to_string(value)?;
    parse(&name).ok_or(ConversionError::UnknownName { kind, name })
}

pub fn rast_state_from_map(map: &Map) -> Result<RastState, ConversionError> {
    let mut state = RastState::DEFAULT;
    for (key, value) in map {
        match key.as_str() {
            "fill_mode" => state.fill_mode = enum_field(value, "fill mode", FillMode::from_name)?,
            "cull_mode" => state.cull_mode = enum_field(value, "cull mode", CullMode::from_name)?,
            "depth_bias" => state.depth_bias = to_i64(value)? as i32,
            "slope_scale_depth_bias" => state.slope_scale_depth_bias = to_f32(value)?,
            "depth_bias_clamp" => state.depth_bias_clamp = to_f32(value)?,
            "enable_scissor" => state.enable_scissor = to_bool(value)?,
            "enable_depth_clip" => state.enable_depth_clip = to_bool(value)?,
            other => return Err(unknown_option("rasterizer field", other)),
        }
    }
    Ok(state)
}

pub fn depth_state_from_map(map: &Map) -> Result<DepthStencilState, ConversionError> {
    let mut state = DepthStencilState::DEFAULT;
    for (key, value) in map {
        match key.as_str() {
            "enable_depth_test" => state.enable_depth_test = to_bool(value)?,
            "enable_depth_write" => state.enable_depth_write = to_bool(value)?,
            "depth_func" => {
                state.depth_func = enum_field(value, "comparison function", ComparisonFunction::from_name)?
            }
            other => return Err(unknown_option("depth state field", other)),
        }
    }
    Ok(state)
}

pub fn blend_state_from_map(map: &Map) -> Result<BlendState, ConversionError> {
    let mut state = BlendState::ALPHA_BLENDING;
    for (key, value) in map {
        match key.as_str() {
            "enable" => state.enable = to_bool(value)?,
            "colour_src" => state.colour_src = enum_field(value, "blend input", BlendInput::from_name)?,
            "colour_dest" => state.colour_dest = enum_field(value, "blend input", BlendInput::from_name)?,
            "colour_op" => state.colour_op = enum_field(value, "blend op", BlendOp::from_name)?,
            "alpha_src" => state.alpha_src = enum_field(value, "blend input", BlendInput::from_name)?,
            "alpha_dest" => state.alpha_dest = enum_field(value, "blend input", BlendInput::from_name)?,
            "alpha_op" => state.alpha_op = enum_field(value, "blend op", BlendOp::from_name)?,
            other => return Err(unknown_option("blend state field", other)),
        }
    }
    Ok(state)
}

pub fn sampler_state_from_map(map: &Map) -> Result<SamplerState, ConversionError> {
    let mut state = SamplerState::DEFAULT;
    for (key, value) in map {
        match key.as_str() {
            "filter" => state.filter = enum_field(value, "texture filter", TextureFilter::from_name)?,
            "address_mode" => {
                state.address_mode = enum_field(value, "address mode", TextureAddressMode::from_name)?
            }
            other => return Err(unknown_option("sampler state field", other)),
        }
    }
    Ok(state)
}

fn named<T: Variant + Clone>(entries: &[(&str, T)]) -> Map {
    entries
        .iter()
        .map(|(name, value)| ((*name).into(), Dynamic::from(value.clone())))
        .collect()
}

/// Constants pushed into every script scope: the canonical state objects and
/// the format names.
pub fn scope_constants() -> Vec<(&'static str, Map)> {
    vec![
        (
            "RastState",
            named(&[("solid", RastState::DEFAULT), ("wireframe", RastState::WIREFRAME)]),
        ),
        (
            "DepthStencilState",
            named(&[
                ("enable_depth", DepthStencilState::ENABLE_DEPTH),
                ("disable_depth", DepthStencilState::DISABLE_DEPTH),
                ("disable_depth_write", DepthStencilState::DISABLE_DEPTH_WRITE),
                ("equal_depth", DepthStencilState::EQUAL_DEPTH),
            ]),
        ),
        (
            "BlendState",
            named(&[
                ("no_blending", BlendState::NO_BLENDING),
                ("alpha_blending", BlendState::ALPHA_BLENDING),
                ("additive_blending", BlendState::ADDITIVE_BLENDING),
            ]),
        ),
        (
            "SamplerState",
            named(&[
                ("linear_wrap", SamplerState::LINEAR_WRAP),
                ("linear_clamp", SamplerState::LINEAR_CLAMP),
                ("point_wrap", SamplerState::POINT_WRAP),
                ("point_clamp", SamplerState::POINT_CLAMP),
            ]),
        ),
        (
            "Format",
            Format::ALL
                .iter()
                .map(|f| (f.name().into(), Dynamic::from(f.name().to_string())))
                .collect(),
        ),
    ]
}

// ============================================================================
// Variables
// ============================================================================

/// `value` is a literal of the variable's shape or a user variable, which is
/// bound live.
pub fn set_constant(var: &ConstantVariable, value: &Dynamic) -> Result<(), ConversionError> {
    let Some(slot) = var.slot() else {
        return Ok(());
    };
    let shaped = to_shader_value(value, &slot.layout.ty)?;
    match value.clone().try_cast::<UserVar>() {
        Some(user) => var.bind(BindSource::Fixed(BindValue::UserVar(user))),
        None => var.set(shaped),
    }
    Ok(())
}

pub fn bind_semantic(var: &ConstantVariable, semantic: &str) -> Result<(), ConversionError> {
    let semantic = SemanticBind::from_name(semantic).ok_or_else(|| ConversionError::UnknownName {
        kind: "semantic",
        name: semantic.to_string(),
    })?;
    var.bind(BindSource::Semantic(semantic));
    Ok(())
}

// ============================================================================
// Resource contents
// ============================================================================

/// Components of `count` elements given as an array (one entry per element,
/// or a flat list of every component) or produced by `generate`.
fn element_values(
    format: Format,
    count: usize,
    contents: &Dynamic,
    generate: impl FnMut(&FnPtr, usize) -> RhaiResult<Dynamic>,
) -> RhaiResult<Vec<u8>> {
    let mut generate = generate;
    if contents.is_unit() {
        return Ok(vec![0; count * format.byte_size()]);
    }
    if let Some(f) = contents.clone().try_cast::<FnPtr>() {
        let values = (0..count).map(|i| generate(&f, i)).collect::<RhaiResult<Vec<_>>>()?;
        return Ok(encode_elements(format, count, |i| flatten_numbers(&values[i]))?);
    }

    let array = to_array(contents)?;
    if array.len() == count {
        return Ok(encode_elements(format, count, |i| flatten_numbers(&array[i]))?);
    }
    let flat = flatten_numbers(contents)?;
    let components = format.components();
    if flat.len() == count * components {
        return Ok(encode_elements(format, count, |i| {
            Ok(flat[i * components..(i + 1) * components].to_vec())
        })?);
    }
    Err(ConversionError::Invalid(format!(
        "expected {count} elements of {format}, found {} values",
        array.len()
    ))
    .into())
}

// ============================================================================
// Registration
// ============================================================================

fn user_var_float(ri: &mut RenderInterface, name: &str, default: Dynamic) -> RhaiResult<UserVar> {
    Ok(ri.add_user_var(UserVar::float(name, to_f32(&default)?)))
}

fn user_var_floats(ri: &mut RenderInterface, name: &str, default: Dynamic, n: usize) -> RhaiResult<UserVar> {
    Ok(ri.add_user_var(UserVar::float_vector(name, &to_f32_list(&default, n)?)))
}

fn user_var_int(ri: &mut RenderInterface, name: &str, default: Dynamic) -> RhaiResult<UserVar> {
    Ok(ri.add_user_var(UserVar::int(name, to_i64(&default)? as i32)))
}

fn user_var_ints(ri: &mut RenderInterface, name: &str, default: Dynamic, n: usize) -> RhaiResult<UserVar> {
    let values: Vec<i32> = to_f32_list(&default, n)?.iter().map(|v| *v as i32).collect();
    Ok(ri.add_user_var(UserVar::int_vector(name, &values)))
}

fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<RenderInterface>("RenderInterface")
        .register_type_with_name::<RenderContext>("RenderContext")
        .register_type_with_name::<Arc<Shader>>("Shader")
        .register_type_with_name::<ConstantVariable>("ConstantVariable")
        .register_type_with_name::<ResourceVariable>("ResourceVariable")
        .register_type_with_name::<SamplerVariable>("SamplerVariable")
        .register_type_with_name::<UavVariable>("UavVariable")
        .register_type_with_name::<UserVar>("UserVar")
        .register_type_with_name::<TextureHandle>("Texture")
        .register_type_with_name::<RenderTargetHandle>("RenderTarget")
        .register_type_with_name::<BufferHandle>("Buffer")
        .register_type_with_name::<ResourceRef>("Resource")
        .register_type_with_name::<TargetRef>("Target")
        .register_type_with_name::<DepthTarget>("DepthBuffer")
        .register_type_with_name::<RastState>("RastState")
        .register_type_with_name::<DepthStencilState>("DepthStencilState")
        .register_type_with_name::<BlendState>("BlendState")
        .register_type_with_name::<SamplerState>("SamplerState");

    engine
        .register_fn("==", |a: &mut RastState, b: RastState| *a == b)
        .register_fn("==", |a: &mut DepthStencilState, b: DepthStencilState| *a == b)
        .register_fn("==", |a: &mut BlendState, b: BlendState| *a == b)
        .register_fn("==", |a: &mut SamplerState, b: SamplerState| *a == b)
        .register_fn("!=", |a: &mut RastState, b: RastState| *a != b)
        .register_fn("!=", |a: &mut DepthStencilState, b: DepthStencilState| *a != b)
        .register_fn("!=", |a: &mut BlendState, b: BlendState| *a != b)
        .register_fn("!=", |a: &mut SamplerState, b: SamplerState| *a != b)
        .register_fn("to_string", |s: &mut RastState| format!("{s:?}"))
        .register_fn("to_string", |s: &mut DepthStencilState| format!("{s:?}"))
        .register_fn("to_string", |s: &mut BlendState| format!("{s:?}"))
        .register_fn("to_string", |s: &mut SamplerState| format!("{s:?}"))
        .register_fn("rast_state", |m: Map| -> RhaiResult<RastState> { Ok(rast_state_from_map(&m)?) })
        .register_fn("depth_stencil_state", |m: Map| -> RhaiResult<DepthStencilState> {
            Ok(depth_state_from_map(&m)?)
        })
        .register_fn("blend_state", |m: Map| -> RhaiResult<BlendState> { Ok(blend_state_from_map(&m)?) })
        .register_fn("sampler_state", |m: Map| -> RhaiResult<SamplerState> { Ok(sampler_state_from_map(&m)?) });
}

fn register_render_interface(engine: &mut Engine) {
    engine
        .register_fn("compile_shader", |ri: &mut RenderInterface, file: &str, entry: &str, profile: &str| {
            let source = ShaderSource::File(ri.project_file(file));
            ri.compile_shader(source, entry, profile, &Map::new()).map_err(ScriptError::into_rhai)
        })
        .register_fn(
            "compile_shader",
            |ri: &mut RenderInterface, file: &str, entry: &str, profile: &str, defines: Map| {
                let source = ShaderSource::File(ri.project_file(file));
                ri.compile_shader(source, entry, profile, &defines).map_err(ScriptError::into_rhai)
            },
        )
        .register_fn(
            "compile_shader_source",
            |ri: &mut RenderInterface, text: &str, entry: &str, profile: &str| {
                let source = ShaderSource::Inline(text.to_string());
                ri.compile_shader(source, entry, profile, &Map::new()).map_err(ScriptError::into_rhai)
            },
        )
        .register_fn(
            "compile_shader_source",
            |ri: &mut RenderInterface, text: &str, entry: &str, profile: &str, defines: Map| {
                let source = ShaderSource::Inline(text.to_string());
                ri.compile_shader(source, entry, profile, &defines).map_err(ScriptError::into_rhai)
            },
        )
        .register_fn("create_render_target", |ri: &mut RenderInterface| -> RhaiResult<RenderTargetHandle> {
            Ok(ri.create_render_target(&Map::new())?)
        })
        .register_fn(
            "create_render_target",
            |ri: &mut RenderInterface, options: Map| -> RhaiResult<RenderTargetHandle> {
                Ok(ri.create_render_target(&options)?)
            },
        )
        .register_fn(
            "create_texture_2d",
            |context: NativeCallContext,
             ri: &mut RenderInterface,
             width: Dynamic,
             height: Dynamic,
             format: &str,
             contents: Dynamic|
             -> RhaiResult<TextureHandle> {
                let (width, height) = (to_u32(&width)?, to_u32(&height)?);
                let format = Format::from_str(format)?;
                let count = texture_byte_len(width, height, format)? / format.byte_size();
                let data = element_values(format, count, &contents, |f, i| {
                    let (x, y) = (i % width.max(1) as usize, i / width.max(1) as usize);
                    f.call_within_context::<Dynamic>(&context, (x as INT, y as INT))
                })?;
                Ok(ri.state.resources.create_texture_2d(TextureDesc {
                    width,
                    height,
                    format,
                    data,
                    mips: false,
                })?)
            },
        )
        .register_fn(
            "create_buffer",
            |context: NativeCallContext,
             ri: &mut RenderInterface,
             count: Dynamic,
             format: &str,
             contents: Dynamic|
             -> RhaiResult<BufferHandle> { create_buffer(&context, ri, &count, format, &contents, false) },
        )
        .register_fn(
            "create_buffer",
            |context: NativeCallContext,
             ri: &mut RenderInterface,
             count: Dynamic,
             format: &str,
             contents: Dynamic,
             uav: bool|
             -> RhaiResult<BufferHandle> { create_buffer(&context, ri, &count, format, &contents, uav) },
        )
        .register_fn("load_texture", |ri: &mut RenderInterface, file: &str| ri.load_texture(file))
        .register_fn("set_frame_callback", |ri: &mut RenderInterface, callback: FnPtr| {
            ri.set_frame_callback(callback)
        })
        .register_fn("set_frame_callback", |ri: &mut RenderInterface, name: &str| -> RhaiResult<()> {
            ri.set_frame_callback(FnPtr::new(name)?);
            Ok(())
        })
        .register_fn("get_scene", |ri: &mut RenderInterface| ri.scene_snapshot())
        .register_get("back_buffer", |_: &mut RenderInterface| TargetRef::BackBuffer)
        .register_get("depth_buffer", |_: &mut RenderInterface| DepthTarget::Default)
        .register_get("no_depth_buffer", |_: &mut RenderInterface| DepthTarget::None);

    engine
        .register_fn("add_user_var_float", user_var_float)
        .register_fn("add_user_var_float2", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_floats(ri, name, v, 2)
        })
        .register_fn("add_user_var_float3", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_floats(ri, name, v, 3)
        })
        .register_fn("add_user_var_float4", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_floats(ri, name, v, 4)
        })
        .register_fn("add_user_var_int", user_var_int)
        .register_fn("add_user_var_int2", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_ints(ri, name, v, 2)
        })
        .register_fn("add_user_var_int3", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_ints(ri, name, v, 3)
        })
        .register_fn("add_user_var_int4", |ri: &mut RenderInterface, name: &str, v: Dynamic| {
            user_var_ints(ri, name, v, 4)
        })
        .register_fn("add_user_var_bool", |ri: &mut RenderInterface, name: &str, v: bool| {
            ri.add_user_var(UserVar::bool(name, v))
        })
        .register_fn("add_user_var_string", |ri: &mut RenderInterface, name: &str, v: &str| {
            ri.add_user_var(UserVar::string(name, v))
        })
        .register_fn(
            "add_user_var_choice",
            |ri: &mut RenderInterface, name: &str, choices: Dynamic, v: &str| -> RhaiResult<UserVar> {
                let var = UserVar::choice(name, to_string_list(&choices)?, v)?;
                Ok(ri.add_user_var(var))
            },
        );

    // shortcuts that look the variable up and act on it in one call
    engine
        .register_fn(
            "set_shader_variable",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, value: Dynamic| -> RhaiResult<()> {
                Ok(set_constant(&ri.constant(&shader, name), &value)?)
            },
        )
        .register_fn(
            "bind_shader_variable",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, semantic: &str| -> RhaiResult<()> {
                Ok(bind_semantic(&ri.constant(&shader, name), semantic)?)
            },
        )
        .register_fn(
            "bind_shader_variable_to_material",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, param: &str| {
                ri.constant(&shader, name).bind(BindSource::Material {
                    param: param.to_string(),
                })
            },
        )
        .register_fn(
            "mark_shader_variable_as_script_override",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str| {
                ri.constant(&shader, name).mark_as_script_override()
            },
        )
        .register_fn(
            "set_shader_resource_variable",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, resource: Dynamic| -> RhaiResult<()> {
                ri.resource(&shader, name).set(to_resource_ref(&resource)?);
                Ok(())
            },
        )
        .register_fn(
            "set_shader_sampler_variable",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, state: SamplerState| {
                ri.sampler(&shader, name).set(state)
            },
        )
        .register_fn(
            "set_shader_uav_variable",
            |ri: &mut RenderInterface, shader: Arc<Shader>, name: &str, target: Dynamic| -> RhaiResult<()> {
                ri.uav(&shader, name).set(to_resource_ref(&target)?);
                Ok(())
            },
        );
}

fn create_buffer(
    context: &NativeCallContext,
    ri: &RenderInterface,
    count: &Dynamic,
    format: &str,
    contents: &Dynamic,
    uav: bool,
) -> RhaiResult<BufferHandle> {
    let count = to_u32(count)?;
    let format = Format::from_str(format)?;
    buffer_byte_len(count, format)?;
    let data = element_values(format, count as usize, contents, |f, i| {
        f.call_within_context::<Dynamic>(context, (i as INT,))
    })?;
    Ok(ri.state.resources.create_buffer(BufferDesc {
        element_count: count,
        format,
        data,
        uav,
    })?)
}

/// `with_mips` on texture handles. File textures get mips unless turned
/// off; created textures only when asked.
fn register_textures(engine: &mut Engine, ri: &RenderInterface) {
    let resources = ri.state.resources.clone();
    let with_mips = move |texture: TextureHandle, mips: bool| -> RhaiResult<TextureHandle> {
        resources.set_texture_mips(texture, mips)?;
        Ok(texture)
    };
    let with_mips_default = with_mips.clone();
    engine
        .register_fn("with_mips", with_mips)
        .register_fn("with_mips", move |texture: TextureHandle| with_mips_default(texture, true))
        .register_fn("with_mips", |resource: ResourceRef, mips: bool| file_with_mips(resource, mips))
        .register_fn("with_mips", |resource: ResourceRef| file_with_mips(resource, true));
}

fn file_with_mips(resource: ResourceRef, mips: bool) -> ResourceRef {
    match resource {
        ResourceRef::File { path, .. } => ResourceRef::File { path, mips },
        other => other,
    }
}

fn register_shader(engine: &mut Engine, ri: &RenderInterface) {
    let (c, r, s, u) = (ri.clone(), ri.clone(), ri.clone(), ri.clone());
    engine
        .register_fn("find_constant_variable", move |shader: &mut Arc<Shader>, name: &str| {
            c.constant(shader, name)
        })
        .register_fn("find_resource_variable", move |shader: &mut Arc<Shader>, name: &str| {
            r.resource(shader, name)
        })
        .register_fn("find_sampler_variable", move |shader: &mut Arc<Shader>, name: &str| {
            s.sampler(shader, name)
        })
        .register_fn("find_uav_variable", move |shader: &mut Arc<Shader>, name: &str| {
            u.uav(shader, name)
        })
        .register_get("entry_point", |shader: &mut Arc<Shader>| shader.compiled().entry_point.clone())
        .register_get("stage", |shader: &mut Arc<Shader>| format!("{:?}", shader.stage()))
        .register_fn("to_string", |shader: &mut Arc<Shader>| {
            let compiled = shader.compiled();
            format!("Shader({}, {})", compiled.label, compiled.entry_point)
        });

    engine
        .register_fn("set", |v: &mut ConstantVariable, value: Dynamic| -> RhaiResult<()> {
            Ok(set_constant(v, &value)?)
        })
        .register_fn("bind", |v: &mut ConstantVariable, semantic: &str| -> RhaiResult<()> {
            Ok(bind_semantic(v, semantic)?)
        })
        .register_fn("bind_to_material", |v: &mut ConstantVariable, param: &str| {
            v.bind(BindSource::Material {
                param: param.to_string(),
            })
        })
        .register_fn("mark_as_script_override", |v: &mut ConstantVariable| v.mark_as_script_override())
        .register_get("is_null", |v: &mut ConstantVariable| v.is_null())
        .register_get("name", |v: &mut ConstantVariable| v.name().to_string())
        .register_get("value", |v: &mut ConstantVariable| {
            v.read_components().into_iter().map(Dynamic::from).collect::<Array>()
        });

    engine
        .register_fn("set", |v: &mut ResourceVariable, resource: Dynamic| -> RhaiResult<()> {
            v.set(to_resource_ref(&resource)?);
            Ok(())
        })
        .register_fn("bind_to_material", |v: &mut ResourceVariable, param: &str| {
            v.bind_to_material(param, None)
        })
        .register_fn(
            "bind_to_material",
            |v: &mut ResourceVariable, param: &str, fallback: Dynamic| -> RhaiResult<()> {
                v.bind_to_material(param, Some(to_resource_ref(&fallback)?));
                Ok(())
            },
        )
        .register_get("is_null", |v: &mut ResourceVariable| v.is_null())
        .register_get("name", |v: &mut ResourceVariable| v.name().to_string());

    engine
        .register_fn("set", |v: &mut SamplerVariable, state: SamplerState| v.set(state))
        .register_get("is_null", |v: &mut SamplerVariable| v.is_null())
        .register_get("name", |v: &mut SamplerVariable| v.name().to_string());

    engine
        .register_fn("set", |v: &mut UavVariable, target: Dynamic| -> RhaiResult<()> {
            v.set(to_resource_ref(&target)?);
            Ok(())
        })
        .register_get("is_null", |v: &mut UavVariable| v.is_null())
        .register_get("name", |v: &mut UavVariable| v.name().to_string());

    engine
        .register_get("value", |v: &mut UserVar| v.value())
        .register_get("name", |v: &mut UserVar| v.name().to_string())
        .register_indexer_get(|v: &mut UserVar, index: INT| -> RhaiResult<Dynamic> {
            let value = v.value();
            match value.clone().try_cast::<Array>() {
                Some(items) => usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| ScriptError::api(format!("index {index} out of range for {}", v.name())).into()),
                None if index == 0 => Ok(value),
                None => Err(ScriptError::api(format!("{} is not a vector", v.name())).into()),
            }
        })
        .register_fn("to_string", |v: &mut UserVar| crate::script_log::stringify_dynamic(&v.value()));
}

fn draw_args(ps: &Dynamic, options: Option<&Map>) -> Result<(Option<Arc<Shader>>, DrawOptions), ConversionError> {
    let ps = to_optional_shader(ps)?;
    let options = match options {
        Some(map) => to_draw_options(map)?,
        None => DrawOptions::default(),
    };
    Ok((ps, options))
}

fn groups(x: &Dynamic, y: &Dynamic, z: &Dynamic) -> Result<[u32; 3], ConversionError> {
    Ok([to_u32(x)?, to_u32(y)?, to_u32(z)?])
}

fn register_context(engine: &mut Engine) {
    type Draw = fn(&RenderContext, &Shader, Option<&Shader>, DrawOptions) -> Result<(), ScriptError>;
    let draws: [(&str, Draw); 3] = [
        ("draw_scene", RenderContext::draw_scene),
        ("draw_sphere", RenderContext::draw_sphere),
        ("draw_fullscreen_quad", RenderContext::draw_fullscreen_quad),
    ];
    for (name, draw) in draws {
        engine
            .register_fn(name, move |ctx: &mut RenderContext, vs: Arc<Shader>, ps: Dynamic| -> RhaiResult<()> {
                let (ps, options) = draw_args(&ps, None)?;
                Ok(draw(ctx, &vs, ps.as_deref(), options)?)
            })
            .register_fn(
                name,
                move |ctx: &mut RenderContext, vs: Arc<Shader>, ps: Dynamic, options: Map| -> RhaiResult<()> {
                    let (ps, options) = draw_args(&ps, Some(&options))?;
                    Ok(draw(ctx, &vs, ps.as_deref(), options)?)
                },
            );
    }

    engine
        .register_fn("clear", |ctx: &mut RenderContext, colour: Dynamic| -> RhaiResult<()> {
            ctx.clear(to_colour(&colour)?, None);
            Ok(())
        })
        .register_fn("clear", |ctx: &mut RenderContext, colour: Dynamic, targets: Dynamic| -> RhaiResult<()> {
            ctx.clear(to_colour(&colour)?, to_targets(&targets)?);
            Ok(())
        })
        .register_fn(
            "dispatch",
            |ctx: &mut RenderContext, cs: Arc<Shader>, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<()> {
                Ok(ctx.dispatch(&cs, groups(&x, &y, &z)?, &Map::new())?)
            },
        )
        .register_fn(
            "dispatch",
            |ctx: &mut RenderContext,
             cs: Arc<Shader>,
             x: Dynamic,
             y: Dynamic,
             z: Dynamic,
             overrides: Map|
             -> RhaiResult<()> { Ok(ctx.dispatch(&cs, groups(&x, &y, &z)?, &overrides)?) },
        )
        .register_fn(
            "dispatch_indirect",
            |ctx: &mut RenderContext, cs: Arc<Shader>, buffer: BufferHandle, offset: Dynamic| -> RhaiResult<()> {
                Ok(ctx.dispatch_indirect(&cs, buffer, to_u32(&offset)?, &Map::new())?)
            },
        )
        .register_fn(
            "dispatch_indirect",
            |ctx: &mut RenderContext,
             cs: Arc<Shader>,
             buffer: BufferHandle,
             offset: Dynamic,
             overrides: Map|
             -> RhaiResult<()> { Ok(ctx.dispatch_indirect(&cs, buffer, to_u32(&offset)?, &overrides)?) },
        )
        .register_fn(
            "draw_wire_sphere",
            |ctx: &mut RenderContext, position: Dynamic, radius: Dynamic, colour: Dynamic| -> RhaiResult<()> {
                let position = Vec3::from_slice(&to_f32_list(&position, 3)?);
                Ok(ctx.draw_wire_sphere(position, to_f32(&radius)?, to_colour(&colour)?, None)?)
            },
        )
        .register_fn(
            "draw_wire_sphere",
            |ctx: &mut RenderContext,
             position: Dynamic,
             radius: Dynamic,
             colour: Dynamic,
             target: Dynamic|
             -> RhaiResult<()> {
                let position = Vec3::from_slice(&to_f32_list(&position, 3)?);
                let target = if target.is_unit() { None } else { Some(to_target(&target)?) };
                Ok(ctx.draw_wire_sphere(position, to_f32(&radius)?, to_colour(&colour)?, target)?)
            },
        )
        .register_get("viewport_width", |ctx: &mut RenderContext| ctx.view().viewport_width as INT)
        .register_get("viewport_height", |ctx: &mut RenderContext| ctx.view().viewport_height as INT)
        .register_get("eye_position", |ctx: &mut RenderContext| vec3(ctx.view().eye_position));
}

/// Register the whole host API on `engine` and return the `ri` object for
/// the run that owns `state`.
pub fn register_api(engine: &mut Engine, state: Arc<ProgramState>) -> RenderInterface {
    let ri = RenderInterface::new(state);
    register_types(engine);
    register_render_interface(engine);
    register_textures(engine, &ri);
    register_shader(engine, &ri);
    register_context(engine);
    ri
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Dynamic)]) -> Map {
        entries.iter().map(|(k, v)| ((*k).into(), v.clone())).collect()
    }

    #[test]
    fn test_draw_options_defaults() {
        let options = to_draw_options(&Map::new()).unwrap();
        assert_eq!(options.pipeline, Default::default());
        assert!(options.targets.is_none());
        assert!(options.depth_buffer.is_none());
    }

    #[test]
    fn test_draw_options_read_states_and_targets() {
        let options = to_draw_options(&map(&[
            ("blend_state", Dynamic::from(BlendState::ALPHA_BLENDING)),
            ("targets", Dynamic::from(RenderTargetHandle(2))),
            ("depth_buffer", Dynamic::from(DepthTarget::None)),
        ]))
        .unwrap();
        assert_eq!(options.pipeline.blend, BlendState::ALPHA_BLENDING);
        assert_eq!(options.targets, Some(vec![TargetRef::RenderTarget(RenderTargetHandle(2))]));
        assert_eq!(options.depth_buffer, Some(DepthTarget::None));
    }

    #[test]
    fn test_unit_targets_mean_back_buffer() {
        let options = to_draw_options(&map(&[("targets", Dynamic::UNIT)])).unwrap();
        assert!(options.targets.is_none());
    }

    #[test]
    fn test_unknown_draw_option_is_rejected() {
        let err = to_draw_options(&map(&[("blend", Dynamic::from(BlendState::ALPHA_BLENDING))])).unwrap_err();
        assert!(matches!(err, ConversionError::UnknownName { kind: "draw option", .. }));
    }

    #[test]
    fn test_wrong_state_type_is_rejected() {
        let err = to_draw_options(&map(&[("rast_state", Dynamic::from(BlendState::DEFAULT))])).unwrap_err();
        assert!(matches!(err, ConversionError::Mismatch { .. }));
    }

    #[test]
    fn test_states_from_maps() {
        let rast = rast_state_from_map(&map(&[
            ("fill_mode", "wireframe".into()),
            ("cull_mode", "None".into()),
        ]))
        .unwrap();
        assert_eq!(rast, RastState::WIREFRAME);

        let depth = depth_state_from_map(&map(&[
            ("enable_depth_write", false.into()),
            ("depth_func", "Equal".into()),
        ]))
        .unwrap();
        assert_eq!(depth, DepthStencilState::EQUAL_DEPTH);

        assert!(sampler_state_from_map(&map(&[("filter", "Bilinear".into())])).is_err());
    }

    #[test]
    fn test_resource_refs_from_handles() {
        assert_eq!(
            to_resource_ref(&Dynamic::from(TextureHandle(1))).unwrap(),
            ResourceRef::Texture(TextureHandle(1))
        );
        assert_eq!(
            to_resource_ref(&Dynamic::from(DepthTarget::Default)).unwrap(),
            ResourceRef::DefaultDepth
        );
        assert!(to_resource_ref(&Dynamic::from(1.0_f32)).is_err());
    }

    #[test]
    fn test_defines_accept_ints_and_floats() {
        let defines = to_defines(&map(&[("STEPS", Dynamic::from(8_i64)), ("SCALE", Dynamic::from(0.5_f32))])).unwrap();
        assert_eq!(defines["STEPS"], 8.0);
        assert_eq!(defines["SCALE"], 0.5);
    }

    #[test]
    fn test_element_values_from_flat_and_nested_arrays() {
        let nested: Array = vec![
            Dynamic::from(vec![Dynamic::from(1.0_f32), Dynamic::from(0.0_f32)]),
            Dynamic::from(vec![Dynamic::from(0.0_f32), Dynamic::from(1.0_f32)]),
        ];
        let flat: Array = [1.0_f32, 0.0, 0.0, 1.0].iter().map(|v| Dynamic::from(*v)).collect();
        let no_generator = |_: &FnPtr, _: usize| -> RhaiResult<Dynamic> { unreachable!() };

        let a = element_values(Format::R32G32B32_Float, 2, &Dynamic::from(nested), no_generator).unwrap();
        assert_eq!(a.len(), 24);
        assert_eq!(&a[16..20], &1.0_f32.to_le_bytes());

        let b = element_values(Format::R32_Float, 4, &Dynamic::from(flat.clone()), no_generator).unwrap();
        assert_eq!(b.len(), 16);
        assert_eq!(&b[..4], &1.0_f32.to_le_bytes());

        let zeros = element_values(Format::R8G8B8A8_UNorm, 3, &Dynamic::UNIT, no_generator).unwrap();
        assert_eq!(zeros, vec![0; 12]);
    }
}
