//! Rhai integration for render scripts.
//!
//! A script runs once, top to bottom. While it runs it can:
//! - `ri.compile_shader(file, entry, profile[, defines])` and look variables up
//!   on the result (`vs.find_constant_variable("Radius").set(1.0)`)
//! - create render targets, textures and buffers through `ri`
//! - add user variables (`ri.add_user_var_float("Radius", 20.0)`)
//! - register the frame callback (`ri.set_frame_callback(|ctx| { ... })`)
//!
//! Every scope also holds the canonical states (`RastState.wireframe`,
//! `BlendState.alpha_blending`, ...), the `Format` names and `log`.
//!
//! Logging:
//! - `log.info(value)`, `log.warn(value)`, `log.error(value)`
//! - `print(value)` and `debug(value)` log at info and debug level
//! - Values can be strings, numbers, booleans, arrays or maps

use std::sync::Arc;

use log::Level;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};

use crate::config::ScriptLimits;
use crate::logging::LogCategory;
use crate::program::{ActiveProgram, ProgramState};
use crate::render::RenderContext;
use crate::script_api::{register_api, scope_constants, RenderInterface};
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};
use crate::script_log::ScriptLogger;

/// One run's engine, with the host API bound to that run's state.
pub struct ScriptEngine {
    engine: Engine,
    ri: RenderInterface,
    log: ScriptLogger,
    state: Arc<ProgramState>,
}

fn apply_limits(engine: &mut Engine, limits: &ScriptLimits) {
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
}

impl ScriptEngine {
    /// Create a sandboxed engine for a run writing into `state`.
    pub fn new(state: Arc<ProgramState>) -> Self {
        let mut engine = Engine::new();
        apply_limits(&mut engine, &state.env.config.script_limits);

        let log = ScriptLogger::new(state.env.logger.clone(), state.env.log_limit.clone());
        let print_log = log.clone();
        engine.on_print(move |text| print_log.emit(Level::Info, text));
        let debug_log = log.clone();
        engine.on_debug(move |text, _source, pos| {
            let line = match pos.line() {
                Some(line) => format!("[line {line}] {text}"),
                None => text.to_string(),
            };
            debug_log.emit(Level::Debug, &line);
        });

        engine
            .register_type_with_name::<ScriptLogger>("Logger")
            .register_fn("info", |log: &mut ScriptLogger, value: Dynamic| log.info(value))
            .register_fn("warn", |log: &mut ScriptLogger, value: Dynamic| log.warn(value))
            .register_fn("error", |log: &mut ScriptLogger, value: Dynamic| log.error(value));

        let ri = register_api(&mut engine, state.clone());

        Self {
            engine,
            ri,
            log,
            state,
        }
    }

    fn scope(&self, globals: &Map) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push_constant("ri", self.ri.clone());
        scope.push_constant("log", self.log.clone());
        for (name, constants) in scope_constants() {
            scope.push_constant(name, constants);
        }
        for (name, value) in globals {
            scope.push_dynamic(name.to_string(), value.clone());
        }
        scope
    }

    /// Compile and run `source`. On success the run becomes a program that
    /// can draw; on failure the diagnostic describes the first error.
    pub fn load_script(self, source: &str, globals: &Map) -> Result<ActiveProgram, ScriptDiagnostic> {
        let logger = self.state.env.logger.clone();
        let ast = match self.engine.compile(source) {
            Ok(ast) => ast,
            Err(err) => {
                logger.error(LogCategory::Script, &format!("Script parse error: {err}"));
                return Err(from_parse_error(&err));
            }
        };

        let mut scope = self.scope(globals);
        if let Err(err) = self.engine.run_ast_with_scope(&mut scope, &ast) {
            logger.error(LogCategory::Script, &format!("Script error: {err}"));
            return Err(from_eval_error(ScriptPhase::Execute, &err));
        }

        Ok(ActiveProgram::new(self.engine, ast, self.state))
    }
}

/// Invoke the program's frame callback with `ctx`. Returns `Ok(false)` when
/// no callback is registered.
pub fn call_frame_callback(program: &ActiveProgram, ctx: &RenderContext) -> Result<bool, Box<EvalAltResult>> {
    let Some(callback) = program.state.callback() else {
        return Ok(false);
    };
    callback.call::<Dynamic>(&program.engine, &program.ast, (ctx.clone(),))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::logging::MemoryLogger;
    use crate::program::SessionEnv;
    use crate::render::context::FrameEnv;
    use crate::render::FrameCommand;
    use crate::script_diagnostics::ScriptDiagnosticKind;
    use crate::view::ViewInfo;
    use crate::workspace::DirectoryWorkspace;

    fn engine_with(config: BenchConfig) -> (ScriptEngine, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        let env = SessionEnv::new(config, logger.clone(), Arc::new(DirectoryWorkspace::new(".")));
        let state = Arc::new(ProgramState::new(Arc::new(env), None));
        (ScriptEngine::new(state), logger)
    }

    fn engine() -> (ScriptEngine, Arc<MemoryLogger>) {
        engine_with(BenchConfig::default())
    }

    fn record(program: &ActiveProgram) -> Vec<FrameCommand> {
        let env: FrameEnv = program.state.frame_env();
        let ctx = RenderContext::new(ViewInfo::default(), None, program.state.resources.clone(), env);
        assert!(call_frame_callback(program, &ctx).unwrap());
        ctx.finish()
    }

    #[test]
    fn test_print_and_log_reach_logger() {
        let (engine, logger) = engine();
        let script = r#"
            print("hello");
            log.warn(["a", 1]);
        "#;
        engine.load_script(script, &Map::new()).unwrap();
        assert!(logger.contains("hello"));
        assert!(logger.contains("a 1"));
    }

    #[test]
    fn test_frame_callback_records_commands() {
        let (engine, _) = engine();
        let script = r#"
            ri.set_frame_callback(|ctx| {
                ctx.clear([1.0, 0.0, 0.0]);
            });
        "#;
        let program = engine.load_script(script, &Map::new()).unwrap();
        let commands = record(&program);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name(), "clear");
    }

    #[test]
    fn test_named_function_callback() {
        let (engine, _) = engine();
        let script = r#"
            fn render(ctx) {
                ctx.clear([ctx.viewport_width / 800, 0, 0]);
            }
            ri.set_frame_callback("render");
        "#;
        let program = engine.load_script(script, &Map::new()).unwrap();
        match &record(&program)[..] {
            [FrameCommand::Clear { colour, .. }] => assert_eq!(colour.x, 1.0),
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn test_no_callback_is_not_an_error() {
        let (engine, _) = engine();
        let program = engine.load_script("let x = 1;", &Map::new()).unwrap();
        let env = program.state.frame_env();
        let ctx = RenderContext::new(ViewInfo::default(), None, program.state.resources.clone(), env);
        assert!(!call_frame_callback(&program, &ctx).unwrap());
    }

    #[test]
    fn test_state_constants_are_in_scope() {
        let (engine, _) = engine();
        let script = r#"
            if BlendState.no_blending == BlendState.alpha_blending { throw "blend"; }
            if RastState.solid == RastState.wireframe { throw "rast"; }
            let custom = rast_state(#{ fill_mode: "Wireframe", cull_mode: "None" });
            if custom != RastState.wireframe { throw "custom rast"; }
        "#;
        engine.load_script(script, &Map::new()).unwrap();
    }

    #[test]
    fn test_globals_are_visible() {
        let (engine, _) = engine();
        let mut globals = Map::new();
        globals.insert("answer".into(), Dynamic::from(42_i64));
        engine
            .load_script(r#"if answer != 42 { throw "missing global"; }"#, &globals)
            .unwrap();
    }

    #[test]
    fn test_parse_error_diagnostic() {
        let (engine, logger) = engine();
        let diag = engine.load_script("let x = ;", &Map::new()).err().unwrap();
        assert_eq!(diag.kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diag.phase, ScriptPhase::Compile);
        assert!(logger.contains("Script parse error"));
    }

    #[test]
    fn test_infinite_loop_hits_operation_limit() {
        let mut config = BenchConfig::default();
        config.script_limits.max_operations = 1_000;
        let (engine, _) = engine_with(config);
        let diag = engine.load_script("loop { }", &Map::new()).err().unwrap();
        assert_eq!(diag.kind, ScriptDiagnosticKind::RuntimeError);
        assert_eq!(diag.phase, ScriptPhase::Execute);
    }

    #[test]
    fn test_host_error_is_classified() {
        let (engine, _) = engine();
        let diag = engine
            .load_script(r#"ri.create_render_target(#{ widht: 4 });"#, &Map::new())
            .err().unwrap();
        assert_eq!(diag.kind, ScriptDiagnosticKind::ConversionError);

        let (engine, _) = self::engine();
        let diag = engine
            .load_script(r#"ri.create_texture_2d(65536, 65536, Format.R8_UNorm, ());"#, &Map::new())
            .err().unwrap();
        assert_eq!(diag.kind, ScriptDiagnosticKind::ConversionError);
    }

    #[test]
    fn test_with_mips_marks_textures() {
        use crate::resources::TextureHandle;

        let (engine, _) = engine();
        let script = r#"
            ri.create_texture_2d(4, 4, Format.R8G8B8A8_UNorm, ()).with_mips();
            ri.create_texture_2d(4, 4, Format.R8G8B8A8_UNorm, ());
            ri.create_texture_2d(4, 4, Format.R8G8B8A8_UNorm, ()).with_mips(true).with_mips(false);
        "#;
        let program = engine.load_script(script, &Map::new()).unwrap();
        let mips: Vec<bool> = (0..3)
            .map(|i| program.state.resources.texture(TextureHandle(i)).unwrap().mips)
            .collect();
        assert_eq!(mips, vec![true, false, false]);
    }
}
