//! Structured script diagnostics.
//!
//! Rhai errors (parse and runtime) and host errors raised from inside
//! registered functions are folded into one serializable shape that a UI or
//! the CLI can show without digging through logs.

use serde::Serialize;

use crate::error::ScriptError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    ParseError,
    RuntimeError,
    /// The script called the host API incorrectly (missing shader, bad handle, ...).
    HostApiMisuse,
    ShaderCompileError,
    ConversionError,
    IoError,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    /// Parsing the script text.
    Compile,
    /// Running the script body.
    Execute,
    /// Inside the per-frame callback.
    Frame,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based.
    pub line: u32,
    /// 1-based.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
}

impl ScriptDiagnostic {
    pub fn from_error(phase: ScriptPhase, error: &ScriptError, position: rhai::Position) -> Self {
        let kind = match error {
            ScriptError::Parse(_) => ScriptDiagnosticKind::ParseError,
            ScriptError::Runtime(message) => classify_message(message),
            ScriptError::Compile(_) => ScriptDiagnosticKind::ShaderCompileError,
            ScriptError::Conversion(_) => ScriptDiagnosticKind::ConversionError,
            ScriptError::Api(_) => ScriptDiagnosticKind::HostApiMisuse,
            ScriptError::Io { .. } => ScriptDiagnosticKind::IoError,
        };
        Self {
            kind,
            phase,
            message: error.to_string(),
            location: location_of(position),
        }
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("function not found")
        || lower.contains("property not found")
        || lower.contains("mismatched types")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }
    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    Some(ScriptLocation {
        line,
        column: pos.position().unwrap_or(1).max(1) as u32,
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    ScriptDiagnostic::from_error(
        ScriptPhase::Compile,
        &ScriptError::Parse(err.to_string()),
        err.position(),
    )
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    ScriptDiagnostic::from_error(phase, &ScriptError::from_rhai(err), err.position())
}
