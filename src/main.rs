use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use pumawatch::config::Config;
use pumawatch::export::health::HealthMetrics;
use pumawatch::export::Publisher;
use pumawatch::scheduler::{Scheduler, SchedulerSettings};
use pumawatch::source::ControlClient;

/// Polls a Puma control server and publishes windowed statistics.
#[derive(Parser)]
#[command(name = "pumawatch", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults plus PUMAWATCH_*
    /// environment overrides apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("pumawatch {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        enabled = cfg.enabled,
        "starting pumawatch",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let health = if cfg.health.enabled {
        let health = Arc::new(HealthMetrics::new(&cfg.health.addr)?);
        health.start().await.context("starting health server")?;
        Some(health)
    } else {
        None
    };

    let source = ControlClient::new(&cfg.control).context("creating control client")?;
    let publisher =
        Publisher::from_config(&cfg.publish, cfg.send_frequency).context("creating publisher")?;

    let mut scheduler = Scheduler::with_health(
        SchedulerSettings::from_config(&cfg),
        source,
        publisher,
        health.clone(),
    );

    scheduler.run().context("starting scheduler")?;

    let _ = shutdown_rx.await;

    scheduler.stop().await;

    if let Some(health) = &health {
        health.stop();
    }

    tracing::info!("pumawatch stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received SIGINT, shutting down");
}
