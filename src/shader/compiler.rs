//! WGSL compilation with a content-addressed cache.
//!
//! The cache key is a SHA-256 digest of the source text, entry point,
//! profile and defines, so an unchanged shader is not recompiled when a
//! script is re-run but an edited file always is.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::CompileError;
use crate::logging::{LogCategory, Logger};
use crate::shader::reflection::{reflect, ShaderReflection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Stage named by a profile such as `vs_5_0`, `ps_5_0` or `cs_5_0`.
    pub fn from_profile(profile: &str) -> Option<Self> {
        let prefix = profile.split('_').next()?.to_ascii_lowercase();
        match prefix.as_str() {
            "vs" => Some(ShaderStage::Vertex),
            "ps" | "fs" => Some(ShaderStage::Fragment),
            "cs" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    fn matches(self, stage: naga::ShaderStage) -> bool {
        matches!(
            (self, stage),
            (ShaderStage::Vertex, naga::ShaderStage::Vertex)
                | (ShaderStage::Fragment, naga::ShaderStage::Fragment)
                | (ShaderStage::Compute, naga::ShaderStage::Compute)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    File(PathBuf),
    Inline(String),
}

impl ShaderSource {
    pub fn label(&self) -> String {
        match self {
            ShaderSource::File(path) => path.display().to_string(),
            ShaderSource::Inline(_) => "<inline>".to_string(),
        }
    }
}

/// A validated, reflected entry point. Immutable and shared between runs.
#[derive(Debug)]
pub struct CompiledShader {
    pub id: u64,
    pub label: String,
    pub entry_point: String,
    pub stage: ShaderStage,
    pub source: Arc<str>,
    /// Pipeline-overridable constants set by defines.
    pub constants: HashMap<String, f64>,
    pub workgroup_size: [u32; 3],
    pub reflection: ShaderReflection,
}

pub struct ShaderCompiler {
    logger: Arc<dyn Logger>,
    cache: Mutex<HashMap<[u8; 32], Arc<CompiledShader>>>,
}

impl ShaderCompiler {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drop cached shaders nothing else holds. Returns how many went.
    pub fn prune_unused(&self) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, shader| Arc::strong_count(shader) > 1);
        before - cache.len()
    }

    /// Compile `entry_point` from `source`. Failures are logged and returned.
    pub fn compile(
        &self,
        source: &ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &BTreeMap<String, f64>,
    ) -> Result<Arc<CompiledShader>, CompileError> {
        let result = self.compile_inner(source, entry_point, profile, defines);
        if let Err(err) = &result {
            self.logger.error(LogCategory::Shader, &err.to_string());
        }
        result
    }

    fn compile_inner(
        &self,
        source: &ShaderSource,
        entry_point: &str,
        profile: &str,
        defines: &BTreeMap<String, f64>,
    ) -> Result<Arc<CompiledShader>, CompileError> {
        let label = source.label();
        let fail = |message: String| CompileError {
            file: label.clone(),
            entry_point: entry_point.to_string(),
            message,
        };

        let text = match source {
            ShaderSource::File(path) => {
                fs::read_to_string(path).map_err(|e| fail(format!("could not read file: {e}")))?
            }
            ShaderSource::Inline(text) => text.clone(),
        };
        let stage = ShaderStage::from_profile(profile)
            .ok_or_else(|| fail(format!("unknown shader profile '{profile}'")))?;

        let key = cache_key(&text, entry_point, profile, defines);
        if let Some(hit) = self.cache.lock().get(&key) {
            log::debug!("shader cache hit for {label}({entry_point})");
            return Ok(hit.clone());
        }

        let module = naga::front::wgsl::parse_str(&text).map_err(|e| fail(e.emit_to_string(&text)))?;
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| fail(e.emit_to_string(&text)))?;

        let (index, ep) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == entry_point)
            .ok_or_else(|| fail("entry point not found".to_string()))?;
        if !stage.matches(ep.stage) {
            return Err(fail(format!(
                "entry point is a {:?} shader but profile '{profile}' needs {stage:?}",
                ep.stage
            )));
        }
        let workgroup_size = ep.workgroup_size;

        let mut constants = HashMap::new();
        for (name, value) in defines {
            let known = module
                .overrides
                .iter()
                .any(|(_, o)| o.name.as_deref() == Some(name.as_str()));
            if known {
                constants.insert(name.clone(), *value);
            } else {
                self.logger.warn(
                    LogCategory::Shader,
                    &format!("{label}: define '{name}' does not match any override constant; ignored."),
                );
            }
        }

        let reflection = reflect(&module, &info, index);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&key[..8]);

        log::info!("compiled {label}({entry_point}) as {stage:?}");
        let compiled = Arc::new(CompiledShader {
            id: u64::from_le_bytes(id_bytes),
            label,
            entry_point: entry_point.to_string(),
            stage,
            source: Arc::from(text.as_str()),
            constants,
            workgroup_size,
            reflection,
        });
        self.cache.lock().insert(key, compiled.clone());
        Ok(compiled)
    }
}

fn cache_key(text: &str, entry_point: &str, profile: &str, defines: &BTreeMap<String, f64>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0]);
    hasher.update(entry_point.as_bytes());
    hasher.update([0]);
    hasher.update(profile.as_bytes());
    for (name, value) in defines {
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update(value.to_le_bytes());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;

    const SOURCE: &str = r#"
override SCALE: f32 = 1.0;

struct Globals {
    Tint: vec4<f32>,
};
@group(0) @binding(0) var<uniform> globals: Globals;

@vertex
fn vs_main(@location(0) pos: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(pos * SCALE, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return globals.Tint;
}
"#;

    fn compiler() -> (Arc<MemoryLogger>, ShaderCompiler) {
        let logger = Arc::new(MemoryLogger::new());
        (logger.clone(), ShaderCompiler::new(logger))
    }

    fn inline(text: &str) -> ShaderSource {
        ShaderSource::Inline(text.to_string())
    }

    #[test]
    fn test_profiles_select_stage() {
        assert_eq!(ShaderStage::from_profile("vs_5_0"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_profile("ps_4_0"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_profile("fs"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_profile("CS_5_0"), Some(ShaderStage::Compute));
        assert_eq!(ShaderStage::from_profile("gs_5_0"), None);
    }

    #[test]
    fn test_compile_and_cache() {
        let (_, compiler) = compiler();
        let a = compiler.compile(&inline(SOURCE), "fs_main", "ps_5_0", &BTreeMap::new()).unwrap();
        let b = compiler.compile(&inline(SOURCE), "fs_main", "ps_5_0", &BTreeMap::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.stage, ShaderStage::Fragment);
        assert_eq!(a.reflection.constants[0].name, "Tint");

        let edited = SOURCE.replace("globals.Tint", "globals.Tint * 0.5");
        let c = compiler.compile(&inline(&edited), "fs_main", "ps_5_0", &BTreeMap::new()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(compiler.cached_count(), 2);
    }

    #[test]
    fn test_prune_keeps_held_shaders() {
        let (_, compiler) = compiler();
        let held = compiler.compile(&inline(SOURCE), "fs_main", "ps_5_0", &BTreeMap::new()).unwrap();
        compiler.compile(&inline(SOURCE), "vs_main", "vs_5_0", &BTreeMap::new()).unwrap();

        assert_eq!(compiler.prune_unused(), 1);
        assert_eq!(compiler.cached_count(), 1);
        let again = compiler.compile(&inline(SOURCE), "fs_main", "ps_5_0", &BTreeMap::new()).unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_stage_mismatch_is_an_error() {
        let (logger, compiler) = compiler();
        let err = compiler
            .compile(&inline(SOURCE), "fs_main", "vs_5_0", &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.entry_point, "fs_main");
        assert!(logger.contains("fs_main"));
    }

    #[test]
    fn test_missing_entry_point() {
        let (_, compiler) = compiler();
        let err = compiler
            .compile(&inline(SOURCE), "main", "ps_5_0", &BTreeMap::new())
            .unwrap_err();
        assert!(err.message.contains("entry point not found"));
    }

    #[test]
    fn test_syntax_error_reports_label() {
        let (logger, compiler) = compiler();
        let err = compiler
            .compile(&inline("fn broken( {"), "main", "ps_5_0", &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.file, "<inline>");
        assert_eq!(logger.entries().len(), 1);
    }

    #[test]
    fn test_defines_map_to_overrides() {
        let (logger, compiler) = compiler();
        let defines = BTreeMap::from([("SCALE".to_string(), 2.0), ("UNUSED".to_string(), 1.0)]);
        let shader = compiler.compile(&inline(SOURCE), "vs_main", "vs_5_0", &defines).unwrap();
        assert_eq!(shader.constants.get("SCALE"), Some(&2.0));
        assert!(!shader.constants.contains_key("UNUSED"));
        assert!(logger.contains("define 'UNUSED'"));
    }

    #[test]
    fn test_missing_file() {
        let (_, compiler) = compiler();
        let source = ShaderSource::File(PathBuf::from("/nonexistent/shader.wgsl"));
        let err = compiler.compile(&source, "main", "ps", &BTreeMap::new()).unwrap_err();
        assert!(err.message.contains("could not read"));
    }
}
