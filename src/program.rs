//! What a script run produces.
//!
//! A run writes into a [`ProgramState`]: the frame callback, the shader
//! instances it compiled, its user variables and its resources. When the run
//! succeeds the state is wrapped in an [`ActiveProgram`] together with the
//! engine and AST the callback needs, and replaces the previous program.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{Engine, FnPtr, AST};

use crate::config::BenchConfig;
use crate::logging::{LogCategory, Logger, OnceFilter};
use crate::observable::{ChangeNotifier, Subscription};
use crate::property::UserProperty;
use crate::render::context::{BuiltinShaders, FrameEnv};
use crate::resources::ResourceTable;
use crate::scene::Scene;
use crate::script_log::FrameLogLimit;
use crate::shader::properties::unbound_constant_properties;
use crate::shader::{CompiledShader, Shader, ShaderCompiler};
use crate::user_vars::UserVar;
use crate::workspace::Workspace;

/// Services shared by every run of a session.
pub struct SessionEnv {
    pub config: BenchConfig,
    pub logger: Arc<dyn Logger>,
    pub workspace: Arc<dyn Workspace>,
    pub compiler: ShaderCompiler,
    pub builtins: Option<Arc<BuiltinShaders>>,
    pub log_limit: Arc<FrameLogLimit>,
}

impl SessionEnv {
    pub fn new(config: BenchConfig, logger: Arc<dyn Logger>, workspace: Arc<dyn Workspace>) -> Self {
        let compiler = ShaderCompiler::new(logger.clone());
        let builtins = match BuiltinShaders::compile(&compiler) {
            Ok(builtins) => Some(Arc::new(builtins)),
            Err(err) => {
                logger.error(LogCategory::Session, &format!("built-in shaders failed to compile: {err}"));
                None
            }
        };
        let log_limit = Arc::new(FrameLogLimit::new(config.max_log_lines_per_frame as u32));
        Self {
            config,
            logger,
            workspace,
            compiler,
            builtins,
            log_limit,
        }
    }
}

/// Everything one run builds up.
pub struct ProgramState {
    pub env: Arc<SessionEnv>,
    pub scene: Option<Arc<Scene>>,
    pub resources: Arc<ResourceTable>,
    pub once: Arc<OnceFilter>,
    callback: Mutex<Option<FnPtr>>,
    shaders: Mutex<Vec<Arc<Shader>>>,
    user_vars: Mutex<Vec<UserVar>>,
}

impl ProgramState {
    pub fn new(env: Arc<SessionEnv>, scene: Option<Arc<Scene>>) -> Self {
        Self {
            env,
            scene,
            resources: Arc::new(ResourceTable::new()),
            once: Arc::new(OnceFilter::new()),
            callback: Mutex::new(None),
            shaders: Mutex::new(Vec::new()),
            user_vars: Mutex::new(Vec::new()),
        }
    }

    pub fn logger(&self) -> &dyn Logger {
        self.env.logger.as_ref()
    }

    pub fn warn_once(&self, category: LogCategory, message: &str) {
        self.once.warn_once(self.env.logger.as_ref(), category, message);
    }

    pub fn frame_env(&self) -> FrameEnv {
        FrameEnv {
            logger: self.env.logger.clone(),
            once: self.once.clone(),
            workspace: self.env.workspace.clone(),
            builtins: self.env.builtins.clone(),
        }
    }

    pub fn set_callback(&self, callback: FnPtr) {
        *self.callback.lock() = Some(callback);
    }

    pub fn callback(&self) -> Option<FnPtr> {
        self.callback.lock().clone()
    }

    /// This run's instance of `compiled`. Compiling the same entry point
    /// twice in one run hands back the same instance.
    pub fn shader_for(&self, compiled: Arc<CompiledShader>) -> Arc<Shader> {
        let mut shaders = self.shaders.lock();
        if let Some(existing) = shaders.iter().find(|s| s.compiled().id == compiled.id) {
            return existing.clone();
        }
        let shader = Arc::new(Shader::instantiate(compiled));
        shaders.push(shader.clone());
        shader
    }

    pub fn shaders(&self) -> Vec<Arc<Shader>> {
        self.shaders.lock().clone()
    }

    pub fn add_user_var(&self, var: UserVar) -> UserVar {
        let mut vars = self.user_vars.lock();
        if vars.iter().any(|v| v.name() == var.name()) {
            self.env.logger.warn(
                LogCategory::Script,
                &format!("User variable '{}' is defined more than once.", var.name()),
            );
        }
        vars.push(var.clone());
        var
    }

    pub fn user_vars(&self) -> Vec<UserVar> {
        self.user_vars.lock().clone()
    }

    /// User variables followed by the unbound constants of every shader.
    /// The first property of a given name wins.
    pub fn properties(&self) -> Vec<Arc<dyn UserProperty>> {
        let mut seen = HashSet::new();
        let user = self.user_vars().into_iter().map(|v| v.property());
        let shader = self
            .shaders()
            .into_iter()
            .flat_map(|s| unbound_constant_properties(&s));
        user.chain(shader)
            .filter(|p| seen.insert(p.name().to_string()))
            .collect()
    }
}

/// A successful run, ready to draw.
pub struct ActiveProgram {
    pub engine: Engine,
    pub ast: AST,
    pub state: Arc<ProgramState>,
    pub properties: Vec<Arc<dyn UserProperty>>,
    _watch: Subscription,
}

impl ActiveProgram {
    pub fn new(engine: Engine, ast: AST, state: Arc<ProgramState>) -> Self {
        let properties = state.properties();
        Self {
            engine,
            ast,
            state,
            properties,
            _watch: Subscription::empty(),
        }
    }

    /// Fire `redraw` whenever one of the program's properties changes.
    pub fn watch(mut self, redraw: &ChangeNotifier) -> Self {
        let subscriptions = self
            .properties
            .iter()
            .map(|p| {
                let redraw = redraw.clone();
                p.subscribe(Arc::new(move || redraw.notify()))
            })
            .collect();
        self._watch = Subscription::merge(subscriptions);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Arc<dyn UserProperty>> {
        self.properties.iter().find(|p| p.name() == name)
    }
}
