//! Session configuration, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Limits applied to every script engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// 0 disables the operation limit.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 1 << 20,
            max_array_size: 1 << 22,
            max_map_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub width: u32,
    pub height: u32,
    pub script_limits: ScriptLimits,
    /// Script log lines admitted per frame.
    pub max_log_lines_per_frame: usize,
    pub max_diagnostics: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            script_limits: ScriptLimits::default(),
            max_log_lines_per_frame: 100,
            max_diagnostics: 32,
        }
    }
}

impl BenchConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = BenchConfig::from_json(r#"{ "width": 320, "script_limits": { "max_operations": 0 } }"#).unwrap();
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 600);
        assert_eq!(config.script_limits.max_operations, 0);
        assert_eq!(config.script_limits.max_call_levels, 64);
        assert_eq!(config.max_diagnostics, 32);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(BenchConfig::from_json("{ width: }").is_err());
    }
}
