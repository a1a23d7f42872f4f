use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::BenchConfig;
use crate::gpu::WgpuBackend;
use crate::logging::{CompositeLogger, LogCrateLogger, MemoryLogger};
use crate::property::display_value;
use crate::render::RecordingBackend;
use crate::scene::Scene;
use crate::script_diagnostics::ScriptDiagnostic;
use crate::session::{FrameStatus, RunState, Script, ScriptSession};
use crate::view::{Camera, ViewInfo};
use crate::workspace::DirectoryWorkspace;

const RUN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScriptArgs {
    /// Rhai script to run
    script: PathBuf,

    /// Project directory shaders and textures are looked up in
    /// (defaults to the script's directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to draw
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Start without the demo scene
    #[arg(long)]
    no_scene: bool,

    /// Output width (overrides the configuration)
    #[arg(long)]
    width: Option<u32>,

    /// Output height (overrides the configuration)
    #[arg(long)]
    height: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script on the GPU and save each frame as a PNG
    Run {
        #[command(flatten)]
        args: ScriptArgs,

        /// Output directory for frames
        #[arg(long, default_value = "frames")]
        out: PathBuf,
    },
    /// Run a script without a GPU and print what each frame records
    Check {
        #[command(flatten)]
        args: ScriptArgs,

        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { args, out } => pollster::block_on(render_offline(&args, &out)),
        Commands::Check { args, json } => check(&args, json),
    }
}

fn load_config(args: &ScriptArgs) -> Result<BenchConfig> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BenchConfig::default(),
    };
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    Ok(config)
}

fn project_dir(args: &ScriptArgs) -> PathBuf {
    args.project.clone().unwrap_or_else(|| {
        args.script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn describe(diagnostic: &ScriptDiagnostic) -> String {
    match &diagnostic.location {
        Some(at) => format!("{:?} at line {}, column {}: {}", diagnostic.kind, at.line, at.column, diagnostic.message),
        None => format!("{:?}: {}", diagnostic.kind, diagnostic.message),
    }
}

/// Run the script to completion and install it.
fn start_session(args: &ScriptArgs, config: BenchConfig, memory: Arc<MemoryLogger>) -> Result<ScriptSession> {
    let logger = CompositeLogger::new().with(Arc::new(LogCrateLogger)).with(memory);
    let workspace = DirectoryWorkspace::new(project_dir(args));
    let session = ScriptSession::new(config, Arc::new(logger), Arc::new(workspace));
    if !args.no_scene {
        session.set_scene(Some(Arc::new(Scene::demo())));
    }

    session.run(Arc::new(Script::file(&args.script)));
    let outcome = session
        .wait_for_completion(RUN_TIMEOUT)
        .ok_or_else(|| anyhow!("script did not finish within {}s", RUN_TIMEOUT.as_secs()))?;
    if outcome.state == RunState::Failed {
        let reason = outcome
            .diagnostic
            .as_ref()
            .map(describe)
            .unwrap_or_else(|| "unknown failure".to_string());
        bail!("{}: {reason}", args.script.display());
    }
    Ok(session)
}

fn view_for(config: &BenchConfig) -> ViewInfo {
    ViewInfo::from_camera(&Camera::default(), config.width, config.height)
}

async fn render_offline(args: &ScriptArgs, out_dir: &Path) -> Result<()> {
    let config = load_config(args)?;
    let (width, height) = (config.width, config.height);
    let view = view_for(&config);
    let session = start_session(args, config, Arc::new(MemoryLogger::new()))?;

    std::fs::create_dir_all(out_dir)?;
    let mut backend = WgpuBackend::headless(width, height).await?;

    println!("Rendering {} frames to {:?}...", args.frames, out_dir);
    for i in 0..args.frames {
        let status = session.render_frame(view.clone(), &mut backend)?;
        if status == FrameStatus::Faulted {
            bail!("frame {i}: frame callback failed");
        }
        backend.save_png(&out_dir.join(format!("frame_{:05}.png", i)))?;
    }
    println!("Done.");
    Ok(())
}

fn check(args: &ScriptArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    let view = view_for(&config);
    let memory = Arc::new(MemoryLogger::new());
    let session = start_session(args, config, memory.clone())?;

    let backend = RecordingBackend::new();
    let mut sink = backend.clone();
    for _ in 0..args.frames {
        session.render_frame(view.clone(), &mut sink)?;
    }

    for (i, frame) in backend.frames().iter().enumerate() {
        let names: Vec<&str> = frame.commands.iter().map(|c| c.name()).collect();
        println!("frame {i}: {}", names.join(", "));
    }
    for property in session.properties() {
        println!("property {} = {}", property.name(), display_value(property.as_ref()));
    }

    let diagnostics = session.take_diagnostics();
    if json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else {
        for entry in memory.entries() {
            println!("[{}] {}", entry.level, entry.message);
        }
        for diagnostic in &diagnostics {
            println!("{}", describe(diagnostic));
        }
    }
    if !diagnostics.is_empty() {
        bail!("{} frame error(s)", diagnostics.len());
    }
    Ok(())
}
