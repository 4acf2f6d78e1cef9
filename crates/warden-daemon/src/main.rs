//! warden-daemon - keeps the warden projections current.
//!
//! Opens the engine database, creates any missing tables, and runs the
//! catch-up supervisor until SIGINT or SIGTERM. On shutdown every task is
//! cancelled at its next suspension point and the final per-task report is
//! logged.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_core::config::EngineConfig;
use warden_core::db::Database;
use warden_core::projection::default_registry;
use warden_core::scheduler::{EngineContext, Supervisor};

/// warden daemon - projection engine for the warden identity platform
#[derive(Parser, Debug)]
#[command(name = "warden-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Path to the database file, overrides `database_path`
    #[arg(long)]
    database: Option<PathBuf>,

    /// Events per batch, overrides `scheduler.batch_size`
    #[arg(long)]
    batch_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_file.as_deref())?;

    let mut config = load_config(&args.config)?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(batch_size) = args.batch_size {
        config.scheduler.batch_size = batch_size;
    }
    config.validate().context("invalid configuration")?;

    let db = Database::open(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;
    let registry = default_registry().context("failed to register projections")?;
    let ctx = EngineContext::new(db, registry, config.scheduler.clone());
    ctx.initialize().context("failed to create tables")?;

    info!(
        database = %config.database_path.display(),
        batch_size = config.scheduler.batch_size,
        staleness_window = ?config.scheduler.staleness_window,
        "warden daemon starting"
    );

    let cancel = CancellationToken::new();
    let supervisor = tokio::spawn(Supervisor::new(ctx, cancel.clone()).run());

    wait_for_shutdown().await?;
    cancel.cancel();

    let report = supervisor.await.context("supervisor task failed")?;
    for entry in &report {
        info!(
            projection = entry.projection,
            instance_id = %entry.instance_id,
            state = %entry.state,
            checkpoint = entry.checkpoint,
            last_error = entry.last_error.as_deref().unwrap_or(""),
            "final task status"
        );
    }
    info!("warden daemon stopped");
    Ok(())
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        EngineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        Ok(EngineConfig::default())
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}
