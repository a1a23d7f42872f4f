//! Shaders as scripts see them.
//!
//! A [`CompiledShader`] is the immutable result of compiling one entry point
//! and may be shared by several runs. A [`Shader`] is one run's instance of
//! it: the constant buffer contents, the variable binds and the lookup
//! caches. Each run starts from fresh instances, so a failed run can never
//! leave binds behind on the shaders the active program draws with.

pub mod binding;
pub mod compiler;
pub mod properties;
pub mod reflection;
pub mod variable;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub use compiler::{CompiledShader, ShaderCompiler, ShaderSource, ShaderStage};

use crate::error::ConversionError;
use crate::observable::{Callback, Subscription};
use crate::resources::ResourceRef;
use crate::state::SamplerState;
use binding::{resolve_constant, resolve_resource, BindSource, ResolveContext, SemanticBind};
use reflection::{BindPoint, ResourceKind};
use variable::{
    ConstantBufferData, ConstantSlot, ConstantVariable, ResourceSlot, ResourceVariable, SamplerSlot,
    SamplerVariable, UavSlot, UavVariable,
};

pub struct Shader {
    compiled: Arc<CompiledShader>,
    buffers: Vec<Arc<ConstantBufferData>>,
    constants: Vec<Arc<ConstantSlot>>,
    resources: Vec<Arc<ResourceSlot>>,
    samplers: Vec<Arc<SamplerSlot>>,
    uavs: Vec<Arc<UavSlot>>,
    constant_lookup: Mutex<HashMap<String, ConstantVariable>>,
    resource_lookup: Mutex<HashMap<String, ResourceVariable>>,
    sampler_lookup: Mutex<HashMap<String, SamplerVariable>>,
    uav_lookup: Mutex<HashMap<String, UavVariable>>,
}

impl Shader {
    /// Create a fresh instance. Constants named after a semantic are bound to
    /// it straight away.
    pub fn instantiate(compiled: Arc<CompiledShader>) -> Self {
        let reflection = &compiled.reflection;
        let buffers: Vec<_> = reflection
            .constant_buffers
            .iter()
            .map(|layout| Arc::new(ConstantBufferData::new(layout.clone())))
            .collect();

        let constants: Vec<_> = reflection
            .constants
            .iter()
            .filter_map(|layout| {
                let buffer = buffers.get(layout.buffer)?.clone();
                Some(Arc::new(ConstantSlot::new(layout.clone(), buffer)))
            })
            .collect();
        for slot in &constants {
            if let Some(semantic) = SemanticBind::from_name(&slot.layout.name) {
                slot.bind(BindSource::Semantic(semantic));
            }
        }

        let resources = reflection
            .resources
            .iter()
            .map(|layout| Arc::new(ResourceSlot::new(layout.clone())))
            .collect();
        let samplers = reflection
            .samplers
            .iter()
            .map(|layout| SamplerVariable::new_slot(layout.clone()))
            .collect();
        let uavs = reflection
            .uavs
            .iter()
            .map(|layout| UavVariable::new_slot(layout.clone()))
            .collect();

        Self {
            compiled,
            buffers,
            constants,
            resources,
            samplers,
            uavs,
            constant_lookup: Mutex::new(HashMap::new()),
            resource_lookup: Mutex::new(HashMap::new()),
            sampler_lookup: Mutex::new(HashMap::new()),
            uav_lookup: Mutex::new(HashMap::new()),
        }
    }

    pub fn compiled(&self) -> &Arc<CompiledShader> {
        &self.compiled
    }

    pub fn stage(&self) -> ShaderStage {
        self.compiled.stage
    }

    pub fn constants(&self) -> &[Arc<ConstantSlot>] {
        &self.constants
    }

    pub fn find_constant_variable(&self, name: &str) -> ConstantVariable {
        self.constant_lookup
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                match self.constants.iter().find(|s| s.layout.name == name) {
                    Some(slot) => ConstantVariable::Live(slot.clone()),
                    None => ConstantVariable::Null(Arc::from(name)),
                }
            })
            .clone()
    }

    pub fn find_resource_variable(&self, name: &str) -> ResourceVariable {
        self.resource_lookup
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                match self.resources.iter().find(|s| s.layout.name == name) {
                    Some(slot) => ResourceVariable::Live(slot.clone()),
                    None => ResourceVariable::Null(Arc::from(name)),
                }
            })
            .clone()
    }

    pub fn find_sampler_variable(&self, name: &str) -> SamplerVariable {
        self.sampler_lookup
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                match self.samplers.iter().find(|s| s.layout.name == name) {
                    Some(slot) => SamplerVariable::Live(slot.clone()),
                    None => SamplerVariable::Null(Arc::from(name)),
                }
            })
            .clone()
    }

    pub fn find_uav_variable(&self, name: &str) -> UavVariable {
        self.uav_lookup
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                match self.uavs.iter().find(|s| s.layout.name == name) {
                    Some(slot) => UavVariable::Live(slot.clone()),
                    None => UavVariable::Null(Arc::from(name)),
                }
            })
            .clone()
    }

    /// Notified whenever a constant's value is written.
    pub fn subscribe(&self, callback: Callback) -> Subscription {
        Subscription::merge(
            self.constants
                .iter()
                .map(|slot| slot.changed.subscribe(callback.clone()))
                .collect(),
        )
    }

    /// Resolve every bind for one draw and snapshot the result.
    pub fn bind_for_draw(&self, ctx: &ResolveContext) -> Result<BoundShader, ConversionError> {
        for slot in &self.constants {
            resolve_constant(slot, ctx)?;
        }

        let constant_buffers = self
            .buffers
            .iter()
            .map(|buffer| BoundBuffer {
                bind_point: buffer.layout.bind_point,
                bytes: buffer.snapshot(),
            })
            .collect();
        let resources = self
            .resources
            .iter()
            .map(|slot| BoundResource {
                name: slot.layout.name.clone(),
                bind_point: slot.layout.bind_point,
                kind: slot.layout.kind,
                resource: resolve_resource(slot, ctx),
            })
            .collect();
        let uavs = self
            .uavs
            .iter()
            .map(|slot| BoundResource {
                name: slot.layout.name.clone(),
                bind_point: slot.layout.bind_point,
                kind: slot.layout.kind,
                resource: slot.target.lock().clone(),
            })
            .collect();
        let samplers = self
            .samplers
            .iter()
            .map(|slot| BoundSampler {
                bind_point: slot.layout.bind_point,
                state: *slot.state.lock(),
                comparison: slot.layout.comparison,
            })
            .collect();

        Ok(BoundShader {
            shader: self.compiled.clone(),
            constant_buffers,
            resources,
            uavs,
            samplers,
        })
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shader({}({}))", self.compiled.label, self.compiled.entry_point)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundBuffer {
    pub bind_point: BindPoint,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundResource {
    pub name: String,
    pub bind_point: BindPoint,
    pub kind: ResourceKind,
    /// `None` when nothing was bound; the backend substitutes a placeholder.
    pub resource: Option<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundSampler {
    pub bind_point: BindPoint,
    pub state: SamplerState,
    pub comparison: bool,
}

/// A shader with every variable resolved for one draw or dispatch.
#[derive(Debug, Clone)]
pub struct BoundShader {
    pub shader: Arc<CompiledShader>,
    pub constant_buffers: Vec<BoundBuffer>,
    pub resources: Vec<BoundResource>,
    pub uavs: Vec<BoundResource>,
    pub samplers: Vec<BoundSampler>,
}

impl BoundShader {
    /// Bytes of the constant buffer at `bind_point`.
    pub fn buffer_at(&self, bind_point: BindPoint) -> Option<&[u8]> {
        self.constant_buffers
            .iter()
            .find(|b| b.bind_point == bind_point)
            .map(|b| b.bytes.as_slice())
    }

    pub fn resource(&self, name: &str) -> Option<&BoundResource> {
        self.resources.iter().chain(&self.uavs).find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogger, OnceFilter};
    use crate::shader::variable::ShaderValue;
    use crate::view::ViewInfo;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    const SOURCE: &str = r#"
struct Globals {
    WorldToProjectionMatrix: mat4x4<f32>,
    Tint: vec4<f32>,
};
@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var albedo: texture_2d<f32>;
@group(0) @binding(2) var albedo_sampler: sampler;

@vertex
fn vs_main(@location(0) pos: vec3<f32>) -> @builtin(position) vec4<f32> {
    return globals.WorldToProjectionMatrix * vec4<f32>(pos, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return textureSample(albedo, albedo_sampler, vec2<f32>(0.5)) * globals.Tint;
}
"#;

    fn shader(entry: &str, profile: &str) -> Shader {
        let compiler = ShaderCompiler::new(Arc::new(MemoryLogger::new()));
        let compiled = compiler
            .compile(&ShaderSource::Inline(SOURCE.into()), entry, profile, &BTreeMap::new())
            .unwrap();
        Shader::instantiate(compiled)
    }

    fn identity_path(p: &Path) -> PathBuf {
        p.to_path_buf()
    }

    #[test]
    fn test_missing_names_return_null_handles() {
        let s = shader("fs_main", "ps_5_0");
        let c = s.find_constant_variable("Nope");
        assert!(c.is_null());
        c.set(ShaderValue::float(1.0));
        assert!(s.find_resource_variable("Nope").is_null());
        assert!(s.find_sampler_variable("Nope").is_null());
        assert!(s.find_uav_variable("Nope").is_null());

        assert!(!s.find_constant_variable("Tint").is_null());
        assert!(!s.find_resource_variable("albedo").is_null());
        assert!(!s.find_sampler_variable("albedo_sampler").is_null());
    }

    #[test]
    fn test_lookups_are_cached() {
        let s = shader("fs_main", "ps_5_0");
        let a = s.find_constant_variable("Tint");
        let b = s.find_constant_variable("Tint");
        assert!(Arc::ptr_eq(a.slot().unwrap(), b.slot().unwrap()));
    }

    #[test]
    fn test_semantic_names_are_auto_bound() {
        let s = shader("vs_main", "vs_5_0");
        let wvp = s.find_constant_variable("WorldToProjectionMatrix");
        assert!(matches!(
            wvp.source(),
            Some(BindSource::Semantic(SemanticBind::WorldToProjectionMatrix))
        ));
        // an explicit bind replaces the auto bind
        wvp.set(ShaderValue::Matrix(glam::Mat4::IDENTITY));
        assert!(matches!(wvp.source(), Some(BindSource::Fixed(_))));
    }

    #[test]
    fn test_bind_for_draw_snapshots_state() {
        let s = shader("fs_main", "ps_5_0");
        s.find_constant_variable("Tint").set(ShaderValue::Floats(vec![1.0, 0.5, 0.25, 1.0]));
        s.find_resource_variable("albedo").set(ResourceRef::DefaultDepth);
        s.find_sampler_variable("albedo_sampler").set(SamplerState::POINT_CLAMP);

        let view = ViewInfo::default();
        let logger = MemoryLogger::new();
        let once = OnceFilter::new();
        let overrides = rhai::Map::new();
        let ctx = ResolveContext {
            view: &view,
            target: None,
            overrides: &overrides,
            logger: &logger,
            once: &once,
            resolve_path: &identity_path,
        };
        let bound = s.bind_for_draw(&ctx).unwrap();

        let bytes = bound.buffer_at(BindPoint { group: 0, binding: 0 }).unwrap();
        assert_eq!(&bytes[64..68], &1.0f32.to_le_bytes());
        assert_eq!(bound.resource("albedo").unwrap().resource, Some(ResourceRef::DefaultDepth));
        assert_eq!(bound.samplers[0].state, SamplerState::POINT_CLAMP);

        // later edits don't reach an earlier snapshot
        s.find_constant_variable("Tint").set(ShaderValue::Floats(vec![0.0; 4]));
        assert_eq!(&bytes[64..68], &1.0f32.to_le_bytes());
    }
}
