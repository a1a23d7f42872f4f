//! Script-facing logging.
//!
//! Scripts get a `log` object with `info`, `warn` and `error` methods, and
//! Rhai's `print`/`debug` are redirected to the same place. Everything ends up
//! in the session's [`Logger`] under [`LogCategory::Script`], capped per frame
//! so a frame callback that logs every tick can't flood the sink.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::Level;

use crate::logging::{LogCategory, Logger};

/// Per-frame cap on script log lines.
#[derive(Debug)]
pub struct FrameLogLimit {
    max_per_frame: u32,
    count: AtomicU32,
    warned: AtomicBool,
}

impl FrameLogLimit {
    pub fn new(max_per_frame: u32) -> Self {
        Self {
            max_per_frame,
            count: AtomicU32::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Call at the start of each frame.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.warned.store(false, Ordering::Relaxed);
    }

    /// Whether another line may be logged. Emits a single notice the first
    /// time the cap is hit.
    fn admit(&self, logger: &dyn Logger) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed);
        if count < self.max_per_frame {
            return true;
        }
        if !self.warned.swap(true, Ordering::Relaxed) {
            logger.warn(
                LogCategory::Script,
                &format!(
                    "Script log limit exceeded ({} messages/frame). Further logs dropped.",
                    self.max_per_frame
                ),
            );
        }
        false
    }
}

/// Convert a Rhai value to display text. Never fails.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }
    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
        return parts.join(" ");
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
            .collect();
        return format!("{{{}}}", parts.join(", "));
    }
    if let Ok(i) = value.as_int() {
        return i.to_string();
    }
    if let Ok(f) = value.as_float() {
        return f.to_string();
    }
    if let Ok(b) = value.as_bool() {
        return b.to_string();
    }
    if value.is_unit() {
        return "()".to_string();
    }
    value.to_string()
}

/// The `log` object registered with Rhai.
#[derive(Clone)]
pub struct ScriptLogger {
    sink: Arc<dyn Logger>,
    limit: Arc<FrameLogLimit>,
}

impl ScriptLogger {
    pub fn new(sink: Arc<dyn Logger>, limit: Arc<FrameLogLimit>) -> Self {
        Self { sink, limit }
    }

    pub fn emit(&self, level: Level, message: &str) {
        if self.limit.admit(self.sink.as_ref()) {
            self.sink.log(LogCategory::Script, level, message);
        }
    }

    pub fn info(&self, value: rhai::Dynamic) {
        self.emit(Level::Info, &stringify_dynamic(&value));
    }

    pub fn warn(&self, value: rhai::Dynamic) {
        self.emit(Level::Warn, &stringify_dynamic(&value));
    }

    pub fn error(&self, value: rhai::Dynamic) {
        self.emit(Level::Error, &stringify_dynamic(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from("hello")), "hello");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(42_i64)), "42");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(true)), "true");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::UNIT), "()");
    }

    #[test]
    fn test_stringify_array() {
        let arr: rhai::Array = vec![rhai::Dynamic::from("radius"), rhai::Dynamic::from(0.5_f32)];
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(arr)), "radius 0.5");
    }

    #[test]
    fn test_frame_log_limit() {
        let sink = Arc::new(MemoryLogger::new());
        let limit = Arc::new(FrameLogLimit::new(3));
        let logger = ScriptLogger::new(sink.clone(), limit.clone());

        for i in 0..5 {
            logger.info(rhai::Dynamic::from(i as i64));
        }
        // three lines plus one limit notice
        assert_eq!(sink.entries().len(), 4);
        assert!(sink.contains("limit exceeded"));

        limit.reset();
        logger.info(rhai::Dynamic::from("again"));
        assert!(sink.contains("again"));
    }
}
