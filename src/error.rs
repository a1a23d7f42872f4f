//! Error types.
//!
//! Script-visible failures travel through Rhai as `Box<EvalAltResult>`; the
//! typed error is carried as the runtime payload so the session can recover
//! it when classifying a failed run.

use rhai::{Dynamic, EvalAltResult, Position};
use thiserror::Error;

/// A value could not be coerced to the shape a variable, property or
/// resource expects.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    #[error("expected at least {expected} components, found {found}")]
    TooFewComponents { expected: usize, found: usize },

    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("{0}")]
    Invalid(String),
}

impl ConversionError {
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        ConversionError::Mismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// A shader failed to load, parse, validate or match its entry point.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{file}({entry_point}): {message}")]
pub struct CompileError {
    pub file: String,
    pub entry_point: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("script parse error: {0}")]
    Parse(String),

    #[error("script runtime error: {0}")]
    Runtime(String),

    #[error("shader compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("{0}")]
    Api(String),

    #[error("could not read '{path}': {message}")]
    Io { path: String, message: String },
}

impl ScriptError {
    pub fn api(message: impl Into<String>) -> Self {
        ScriptError::Api(message.into())
    }

    /// Wrap for return from a registered Rhai function.
    pub fn into_rhai(self) -> Box<EvalAltResult> {
        EvalAltResult::ErrorRuntime(Dynamic::from(self), Position::NONE).into()
    }

    /// Recover the typed error from a Rhai failure, looking through nested
    /// function-call frames. Anything that was not raised by the host becomes
    /// `Runtime`.
    pub fn from_rhai(err: &EvalAltResult) -> Self {
        match err {
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => Self::from_rhai(inner),
            EvalAltResult::ErrorRuntime(payload, _) => match payload.clone().try_cast::<ScriptError>() {
                Some(typed) => typed,
                None => ScriptError::Runtime(err.to_string()),
            },
            EvalAltResult::ErrorParsing(parse, _) => ScriptError::Parse(parse.to_string()),
            other => ScriptError::Runtime(other.to_string()),
        }
    }
}

impl From<ScriptError> for Box<EvalAltResult> {
    fn from(err: ScriptError) -> Self {
        err.into_rhai()
    }
}

impl From<ConversionError> for Box<EvalAltResult> {
    fn from(err: ConversionError) -> Self {
        ScriptError::Conversion(err).into_rhai()
    }
}

impl From<CompileError> for Box<EvalAltResult> {
    fn from(err: CompileError) -> Self {
        ScriptError::Compile(err).into_rhai()
    }
}

/// Failures inside a render backend while executing a recorded frame.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no suitable GPU adapter")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("format {0} cannot back a texture")]
    UnsupportedFormat(crate::format::Format),

    #[error("could not load texture '{path}': {message}")]
    TextureLoad { path: String, message: String },

    #[error("frame read-back failed: {0}")]
    Readback(String),

    #[error("GPU validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_error_survives_rhai_round_trip() {
        let err = ScriptError::Compile(CompileError {
            file: "shader.wgsl".into(),
            entry_point: "vs_main".into(),
            message: "bad".into(),
        });
        let rhai_err = err.clone().into_rhai();
        assert_eq!(ScriptError::from_rhai(&rhai_err), err);
    }

    #[test]
    fn test_nested_function_call_is_unwrapped() {
        let inner = ScriptError::api("no vertex shader").into_rhai();
        let outer = EvalAltResult::ErrorInFunctionCall(
            "callback".into(),
            String::new(),
            inner,
            Position::NONE,
        );
        assert_eq!(
            ScriptError::from_rhai(&outer),
            ScriptError::Api("no vertex shader".into())
        );
    }

    #[test]
    fn test_compile_error_display_names_file_and_entry() {
        let err = CompileError {
            file: "a.wgsl".into(),
            entry_point: "fs_main".into(),
            message: "unknown identifier".into(),
        };
        assert_eq!(err.to_string(), "a.wgsl(fs_main): unknown identifier");
    }
}
