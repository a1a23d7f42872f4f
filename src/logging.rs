//! Diagnostics sinks.
//!
//! Components never write to a global logger directly; they receive an
//! `Arc<dyn Logger>` when constructed. The binary wires a [`LogCrateLogger`]
//! (which goes through `env_logger`), tests use a [`MemoryLogger`], and a
//! [`CompositeLogger`] fans out to several sinks at once.

use std::collections::HashSet;
use std::sync::Arc;

use log::Level;
use parking_lot::Mutex;

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Output of the user script itself (`print`, `log.info`, ...).
    Script,
    /// Shader compilation and reflection.
    Shader,
    /// Per-frame command recording and binding resolution.
    Render,
    /// Script run lifecycle.
    Session,
}

impl LogCategory {
    pub fn target(self) -> &'static str {
        match self {
            LogCategory::Script => "shaderbench::script",
            LogCategory::Shader => "shaderbench::shader",
            LogCategory::Render => "shaderbench::render",
            LogCategory::Session => "shaderbench::session",
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, category: LogCategory, level: Level, message: &str);

    fn info(&self, category: LogCategory, message: &str) {
        self.log(category, Level::Info, message);
    }

    fn warn(&self, category: LogCategory, message: &str) {
        self.log(category, Level::Warn, message);
    }

    fn error(&self, category: LogCategory, message: &str) {
        self.log(category, Level::Error, message);
    }
}

/// Forwards to the `log` facade, one target per category.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn log(&self, category: LogCategory, level: Level, message: &str) {
        log::log!(target: category.target(), level, "{}", message);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _category: LogCategory, _level: Level, _message: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: LogCategory,
    pub level: Level,
    pub message: String,
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// True if any logged message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.message.contains(needle))
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, category: LogCategory, level: Level, message: &str) {
        self.entries.lock().push(LogEntry {
            category,
            level,
            message: message.to_string(),
        });
    }
}

#[derive(Default, Clone)]
pub struct CompositeLogger {
    sinks: Vec<Arc<dyn Logger>>,
}

impl CompositeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Logger>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Logger for CompositeLogger {
    fn log(&self, category: LogCategory, level: Level, message: &str) {
        for sink in &self.sinks {
            sink.log(category, level, message);
        }
    }
}

/// Suppresses repeats of the same message until [`OnceFilter::reset`].
#[derive(Debug, Default)]
pub struct OnceFilter {
    seen: Mutex<HashSet<String>>,
}

impl OnceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn_once(&self, logger: &dyn Logger, category: LogCategory, message: &str) {
        if self.seen.lock().insert(message.to_string()) {
            logger.warn(category, message);
        }
    }

    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}
