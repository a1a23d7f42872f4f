//! Script sessions: running scripts and drawing frames with the result.
//!
//! At most one script runs at a time. A run executes on a worker thread
//! against a fresh [`ProgramState`], so nothing it does is visible until it
//! succeeds; the owning thread then swaps it in as the active program when it
//! polls for completion. A failed run leaves the active program untouched.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Map, Position};

use crate::config::BenchConfig;
use crate::error::{BackendError, ScriptError};
use crate::logging::{LogCategory, Logger};
use crate::observable::{Callback, ChangeNotifier, Subscription};
use crate::program::{ActiveProgram, ProgramState, SessionEnv};
use crate::property::{try_copy_from, UserProperty};
use crate::render::{Frame, RenderBackend, RenderContext};
use crate::resources::ResourceTable;
use crate::scene::Scene;
use crate::script_diagnostics::{from_eval_error, ScriptDiagnostic, ScriptPhase};
use crate::scripting::{call_frame_callback, ScriptEngine};
use crate::view::ViewInfo;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Succeeded,
            3 => RunState::Failed,
            _ => RunState::Idle,
        }
    }
}

/// Answer to a run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    Started,
    /// Another run is in flight; the request was dropped.
    Refused,
    /// `rerun_last` with nothing run yet.
    NoScript,
}

#[derive(Debug, Clone)]
pub enum ScriptSource {
    /// Read from disk each time the script runs.
    File(PathBuf),
    Inline(String),
}

/// A script plus the globals the host passes in. Re-runs are by identity, so
/// hold on to the `Arc`.
#[derive(Debug, Clone)]
pub struct Script {
    pub source: ScriptSource,
    pub globals: Map,
}

impl Script {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ScriptSource::File(path.into()),
            globals: Map::new(),
        }
    }

    pub fn inline(text: impl Into<String>) -> Self {
        Self {
            source: ScriptSource::Inline(text.into()),
            globals: Map::new(),
        }
    }

    pub fn with_global(mut self, name: &str, value: impl Into<Dynamic>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn label(&self) -> String {
        match &self.source {
            ScriptSource::File(path) => path.display().to_string(),
            ScriptSource::Inline(_) => "<inline>".to_string(),
        }
    }

    fn text(&self) -> Result<String, ScriptError> {
        match &self.source {
            ScriptSource::File(path) => std::fs::read_to_string(path).map_err(|e| ScriptError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            ScriptSource::Inline(text) => Ok(text.clone()),
        }
    }
}

/// How a finished run went, as seen by the owning thread.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub script: Arc<Script>,
    pub state: RunState,
    pub diagnostic: Option<ScriptDiagnostic>,
}

/// What `render_frame` drew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame callback ran.
    Drawn,
    /// No program or no callback; only the initial clear.
    Empty,
    /// The callback failed, now or on an earlier frame.
    Faulted,
}

struct Completion {
    script: Arc<Script>,
    result: Result<ActiveProgram, ScriptDiagnostic>,
}

pub struct ScriptSession {
    env: Arc<SessionEnv>,
    state: AtomicU8,
    active: RwLock<Option<Arc<ActiveProgram>>>,
    last_script: Mutex<Option<Arc<Script>>>,
    scene: RwLock<Option<Arc<Scene>>>,
    scene_watch: Mutex<Subscription>,
    completion_tx: Sender<Completion>,
    completion_rx: Mutex<Receiver<Completion>>,
    render_fault: AtomicBool,
    redraw: ChangeNotifier,
    diagnostics: Mutex<VecDeque<ScriptDiagnostic>>,
    empty_resources: Arc<ResourceTable>,
}

fn execute(env: Arc<SessionEnv>, scene: Option<Arc<Scene>>, script: &Script) -> Result<ActiveProgram, ScriptDiagnostic> {
    let text = script.text().map_err(|err| {
        env.logger.error(LogCategory::Session, &err.to_string());
        ScriptDiagnostic::from_error(ScriptPhase::Compile, &err, Position::NONE)
    })?;
    let state = Arc::new(ProgramState::new(env, scene));
    ScriptEngine::new(state).load_script(&text, &script.globals)
}

impl ScriptSession {
    pub fn new(config: BenchConfig, logger: Arc<dyn Logger>, workspace: Arc<dyn Workspace>) -> Self {
        let (completion_tx, completion_rx) = channel();
        Self {
            env: Arc::new(SessionEnv::new(config, logger, workspace)),
            state: AtomicU8::new(RunState::Idle as u8),
            active: RwLock::new(None),
            last_script: Mutex::new(None),
            scene: RwLock::new(None),
            scene_watch: Mutex::new(Subscription::empty()),
            completion_tx,
            completion_rx: Mutex::new(completion_rx),
            render_fault: AtomicBool::new(false),
            redraw: ChangeNotifier::new(),
            diagnostics: Mutex::new(VecDeque::new()),
            empty_resources: Arc::new(ResourceTable::new()),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &BenchConfig {
        &self.env.config
    }

    /// Start `script` on a worker thread unless a run is in flight.
    pub fn run(&self, script: Arc<Script>) -> RunRequest {
        let claimed = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
            (s != RunState::Running as u8).then_some(RunState::Running as u8)
        });
        if claimed.is_err() {
            self.env.logger.warn(
                LogCategory::Session,
                &format!("Script '{}' not run: another script is still running.", script.label()),
            );
            return RunRequest::Refused;
        }

        *self.last_script.lock() = Some(script.clone());
        self.env
            .logger
            .info(LogCategory::Session, &format!("Running script '{}'.", script.label()));

        let env = self.env.clone();
        let scene = self.scene.read().clone();
        let tx = self.completion_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("script-run".into())
            .spawn(move || {
                let result = execute(env, scene, &script);
                // the session may be gone; the result is simply dropped
                let _ = tx.send(Completion { script, result });
            });
        if let Err(err) = spawned {
            self.env
                .logger
                .error(LogCategory::Session, &format!("Could not start script thread: {err}"));
            self.state.store(RunState::Idle as u8, Ordering::Release);
            return RunRequest::Refused;
        }
        RunRequest::Started
    }

    /// Run the most recently run script object again.
    pub fn rerun_last(&self) -> RunRequest {
        let last = self.last_script.lock().clone();
        match last {
            Some(script) => self.run(script),
            None => RunRequest::NoScript,
        }
    }

    pub fn last_script(&self) -> Option<Arc<Script>> {
        self.last_script.lock().clone()
    }

    /// Apply a finished run, if there is one. Call from the owning thread.
    pub fn poll_completion(&self) -> Option<RunOutcome> {
        let completion = self.completion_rx.lock().try_recv().ok()?;
        Some(self.complete(completion))
    }

    /// Block until the current run finishes or `timeout` passes.
    pub fn wait_for_completion(&self, timeout: Duration) -> Option<RunOutcome> {
        let completion = match self.completion_rx.lock().recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        };
        Some(self.complete(completion))
    }

    fn complete(&self, completion: Completion) -> RunOutcome {
        let Completion { script, result } = completion;
        let outcome = match result {
            Ok(program) => {
                if let Some(previous) = self.active.read().as_ref() {
                    for property in &program.properties {
                        if let Some(old) = previous.property(property.name()) {
                            try_copy_from(property.as_ref(), old.as_ref());
                        }
                    }
                }
                let program = Arc::new(program.watch(&self.redraw));
                *self.active.write() = Some(program);
                self.render_fault.store(false, Ordering::Release);
                self.state.store(RunState::Succeeded as u8, Ordering::Release);
                self.env.logger.info(
                    LogCategory::Session,
                    &format!("Script '{}' completed successfully.", script.label()),
                );
                RunOutcome {
                    script,
                    state: RunState::Succeeded,
                    diagnostic: None,
                }
            }
            Err(diagnostic) => {
                self.state.store(RunState::Failed as u8, Ordering::Release);
                self.env.logger.error(
                    LogCategory::Session,
                    &format!("Script '{}' failed: {}", script.label(), diagnostic.message),
                );
                self.push_diagnostic(diagnostic.clone());
                RunOutcome {
                    script,
                    state: RunState::Failed,
                    diagnostic: Some(diagnostic),
                }
            }
        };
        let pruned = self.env.compiler.prune_unused();
        if pruned > 0 {
            log::debug!("dropped {pruned} unused compiled shaders");
        }
        self.state.store(RunState::Idle as u8, Ordering::Release);
        self.redraw.notify();
        outcome
    }

    fn push_diagnostic(&self, diagnostic: ScriptDiagnostic) {
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.push_back(diagnostic);
        while diagnostics.len() > self.env.config.max_diagnostics.max(1) {
            diagnostics.pop_front();
        }
    }

    pub fn take_diagnostics(&self) -> Vec<ScriptDiagnostic> {
        self.diagnostics.lock().drain(..).collect()
    }

    pub fn active_program(&self) -> Option<Arc<ActiveProgram>> {
        self.active.read().clone()
    }

    /// User-editable properties of the active program.
    pub fn properties(&self) -> Vec<Arc<dyn UserProperty>> {
        self.active_program()
            .map(|p| p.properties.clone())
            .unwrap_or_default()
    }

    pub fn property(&self, name: &str) -> Option<Arc<dyn UserProperty>> {
        self.active_program().and_then(|p| p.property(name).cloned())
    }

    pub fn set_scene(&self, scene: Option<Arc<Scene>>) {
        let redraw = self.redraw.clone();
        let watch = match &scene {
            Some(scene) => scene.subscribe(Arc::new(move || redraw.notify())),
            None => Subscription::empty(),
        };
        *self.scene_watch.lock() = watch;
        *self.scene.write() = scene;
        self.render_fault.store(false, Ordering::Release);
        self.redraw.notify();
    }

    pub fn scene(&self) -> Option<Arc<Scene>> {
        self.scene.read().clone()
    }

    /// Fired when a property, the scene or the active program changes.
    pub fn on_redraw(&self, callback: Callback) -> Subscription {
        self.redraw.subscribe(callback)
    }

    pub fn is_faulted(&self) -> bool {
        self.render_fault.load(Ordering::Acquire)
    }

    /// Record one frame with the active program and hand it to `backend`.
    pub fn render_frame(&self, view: ViewInfo, backend: &mut dyn RenderBackend) -> Result<FrameStatus, BackendError> {
        self.env.log_limit.reset();
        let mut frame = Frame::begin(view.clone());
        let program = self.active_program();

        let status = match &program {
            None => FrameStatus::Empty,
            Some(_) if self.is_faulted() => FrameStatus::Faulted,
            Some(program) => {
                let ctx = RenderContext::new(
                    view,
                    self.scene(),
                    program.state.resources.clone(),
                    program.state.frame_env(),
                );
                match call_frame_callback(program, &ctx) {
                    Ok(true) => {
                        frame.commands.extend(ctx.finish());
                        FrameStatus::Drawn
                    }
                    Ok(false) => FrameStatus::Empty,
                    Err(err) => {
                        self.env
                            .logger
                            .error(LogCategory::Render, &format!("Error executing frame callback: {err}"));
                        self.push_diagnostic(from_eval_error(ScriptPhase::Frame, &err));
                        self.render_fault.store(true, Ordering::Release);
                        FrameStatus::Faulted
                    }
                }
            }
        };

        let resources = program
            .as_ref()
            .map(|p| p.state.resources.clone())
            .unwrap_or_else(|| self.empty_resources.clone());
        backend.submit(&frame, &resources)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;
    use crate::render::RecordingBackend;
    use crate::workspace::DirectoryWorkspace;

    const WAIT: Duration = Duration::from_secs(10);

    fn session() -> (ScriptSession, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        let session = ScriptSession::new(
            BenchConfig::default(),
            logger.clone(),
            Arc::new(DirectoryWorkspace::new(".")),
        );
        (session, logger)
    }

    fn run(session: &ScriptSession, text: &str) -> RunOutcome {
        assert_eq!(session.run(Arc::new(Script::inline(text))), RunRequest::Started);
        session.wait_for_completion(WAIT).expect("run finished")
    }

    #[test]
    fn test_successful_run_returns_to_idle() {
        let (session, _) = session();
        let outcome = run(&session, "let x = 1;");
        assert_eq!(outcome.state, RunState::Succeeded);
        assert_eq!(session.state(), RunState::Idle);
        assert!(session.active_program().is_some());
    }

    #[test]
    fn test_edited_shaders_do_not_pile_up_in_cache() {
        let (session, _) = session();
        let script = |scale: f32| {
            format!(
                r#"
                let vs = ri.compile_shader_source(`
                    @vertex
                    fn vs(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {{
                        return vec4<f32>(p * {scale:.1}, 1.0);
                    }}`, "vs", "vs_5_0");
                ri.set_frame_callback(|ctx| {{ ctx.draw_sphere(vs, ()); }});
                "#
            )
        };
        assert_eq!(run(&session, &script(1.0)).state, RunState::Succeeded);
        let cached = session.env.compiler.cached_count();
        for scale in [2.0, 3.0, 4.0] {
            assert_eq!(run(&session, &script(scale)).state, RunState::Succeeded);
        }
        assert_eq!(session.env.compiler.cached_count(), cached);
    }

    #[test]
    fn test_rerun_without_script() {
        let (session, _) = session();
        assert_eq!(session.rerun_last(), RunRequest::NoScript);
    }

    #[test]
    fn test_render_without_program_only_clears() {
        let (session, _) = session();
        let mut backend = RecordingBackend::new();
        let status = session.render_frame(ViewInfo::default(), &mut backend).unwrap();
        assert_eq!(status, FrameStatus::Empty);
        assert_eq!(backend.last_frame().unwrap().commands.len(), 1);
    }

    #[test]
    fn test_frame_error_latches_until_rerun() {
        let (session, logger) = session();
        run(&session, r#"ri.set_frame_callback(|ctx| { throw "boom"; });"#);
        let mut backend = RecordingBackend::new();

        let first = session.render_frame(ViewInfo::default(), &mut backend).unwrap();
        let second = session.render_frame(ViewInfo::default(), &mut backend).unwrap();
        assert_eq!((first, second), (FrameStatus::Faulted, FrameStatus::Faulted));
        assert_eq!(logger.count_containing("Error executing frame callback"), 1);
        assert_eq!(session.take_diagnostics()[0].phase, ScriptPhase::Frame);

        run(&session, r#"ri.set_frame_callback(|ctx| { ctx.clear([0, 0, 1]); });"#);
        assert_eq!(
            session.render_frame(ViewInfo::default(), &mut backend).unwrap(),
            FrameStatus::Drawn
        );
    }

    #[test]
    fn test_scene_change_clears_fault() {
        let (session, _) = session();
        run(&session, r#"ri.set_frame_callback(|ctx| { throw "boom"; });"#);
        let mut backend = RecordingBackend::new();
        session.render_frame(ViewInfo::default(), &mut backend).unwrap();
        assert!(session.is_faulted());
        session.set_scene(Some(Arc::new(Scene::new())));
        assert!(!session.is_faulted());
    }

    #[test]
    fn test_missing_script_file_fails_run() {
        let (session, _) = session();
        session.run(Arc::new(Script::file("/definitely/not/here.rhai")));
        let outcome = session.wait_for_completion(WAIT).unwrap();
        assert_eq!(outcome.state, RunState::Failed);
        let diag = outcome.diagnostic.unwrap();
        assert_eq!(diag.kind, crate::script_diagnostics::ScriptDiagnosticKind::IoError);
    }

    #[test]
    fn test_diagnostics_are_bounded() {
        let logger = Arc::new(MemoryLogger::new());
        let config = BenchConfig {
            max_diagnostics: 2,
            ..BenchConfig::default()
        };
        let session = ScriptSession::new(config, logger, Arc::new(DirectoryWorkspace::new(".")));
        for i in 0..4 {
            run(&session, &format!("throw \"failure {i}\";"));
        }
        let diagnostics = session.take_diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[1].message.contains("failure 3"));
    }
}
