use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facereg::config::{self, Config};
use facereg::storage::{FileStorage, IdentityStore};
use facereg::{
    CommandExtractor, FrameSource, LastResult, Session, SessionError, SessionOptions, StillFrame,
};
use log::info;

#[derive(Parser)]
#[command(name = "facereg")]
#[command(version, about = "Register faces by name and look them up again")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the face in the current frame under a name
    Register {
        #[arg(short, long)]
        name: String,
        /// Use a still image instead of the camera
        #[arg(short, long)]
        frame: Option<PathBuf>,
    },
    /// Find the name of the face in the current frame
    Find {
        /// Use a still image instead of the camera
        #[arg(short, long)]
        frame: Option<PathBuf>,
    },
    /// List registered names
    List,
    /// Remove every registered face
    Clear,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Register { name, frame } => register(&cfg, &name, frame.as_deref()),
        Commands::Find { frame } => find(&cfg, frame.as_deref()),
        Commands::List => list(&cfg),
        Commands::Clear => clear(&cfg),
        Commands::Config => open_config(config_path),
    }
}

fn open_store(cfg: &Config) -> IdentityStore<FileStorage> {
    IdentityStore::new(FileStorage::new(cfg.store_dir()))
}

fn open_session(
    cfg: &Config,
    frame: Option<&Path>,
) -> Result<Session<FileStorage, CommandExtractor, Box<dyn FrameSource>>> {
    let extractor = CommandExtractor::load(
        &cfg.extractor.program,
        cfg.extractor.args.clone(),
        cfg.extractor.model_dir.clone(),
        Duration::from_secs(cfg.extractor.timeout_secs),
    )
    .context("Failed to initialize descriptor extractor")?;
    let frames = open_frames(cfg, frame)?;
    let options = SessionOptions {
        threshold: cfg.threshold,
        on_corrupt: cfg.on_corrupt,
    };
    Ok(Session::start(open_store(cfg), extractor, frames, options)?)
}

fn open_frames(cfg: &Config, frame: Option<&Path>) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = frame {
        return Ok(Box::new(StillFrame::open(path)?));
    }
    open_camera(&cfg.camera)
}

#[cfg(feature = "v4l")]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    info!("Opening camera: {}", device);
    let camera = facereg_vision::Camera::open(device).map_err(SessionError::CameraUnavailable)?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l"))]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    Err(SessionError::CameraUnavailable(anyhow::anyhow!(
        "{device}: built without camera support, pass --frame <PATH>"
    ))
    .into())
}

fn register(cfg: &Config, name: &str, frame: Option<&Path>) -> Result<()> {
    let session = open_session(cfg, frame)?;
    session.set_name_input(name);
    let identity = session.register().context("Failed to register face")?;
    info!(
        "✓ Registered {} ({} faces stored)",
        identity.name,
        session.snapshot().identity_count
    );
    Ok(())
}

fn find(cfg: &Config, frame: Option<&Path>) -> Result<()> {
    let session = open_session(cfg, frame)?;
    match session.find().context("Failed to look up face")? {
        None => anyhow::bail!("No faces registered yet. Run 'register' first."),
        Some(LastResult::Matched { name, distance }) => {
            info!("Detected name: {} (distance {:.3})", name, distance);
            println!("{name}");
        }
        Some(LastResult::NoMatch) => {
            info!("No match found.");
            println!("{}", facereg::matcher::UNKNOWN_LABEL);
        }
    }
    Ok(())
}

/// Read-only: corrupt data is reported, never discarded.
fn list(cfg: &Config) -> Result<()> {
    let identities = open_store(cfg)
        .load()
        .context("Failed to load registered faces")?;
    info!("{} registered face(s)", identities.len());
    for identity in identities {
        println!("{}\t{} dims", identity.name, identity.descriptor.len());
    }
    Ok(())
}

fn clear(cfg: &Config) -> Result<()> {
    open_store(cfg)
        .clear()
        .context("Failed to clear registered faces")?;
    info!("✓ All registered faces removed");
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
