pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod observable;
pub mod property;
pub mod workspace;

// Scene and view
pub mod scene;
pub mod view;

// Shaders and variable binding
pub mod coerce;
pub mod resources;
pub mod shader;
pub mod state;
pub mod user_vars;

// Frame recording and execution
pub mod gpu;
pub mod render;

// Scripting
pub mod program;
pub mod script_api;
pub mod script_diagnostics;
pub mod script_log;
pub mod scripting;
pub mod session;

pub mod cli;

pub use config::BenchConfig;
pub use session::{FrameStatus, RunOutcome, RunRequest, RunState, Script, ScriptSession};
