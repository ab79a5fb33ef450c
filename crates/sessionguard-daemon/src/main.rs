//! sessionguard daemon binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sessionguard_core::config::GuardConfig;
use sessionguard_core::event::RawEvent;
use sessionguard_daemon::Daemon;

/// sessionguard - real-time session surveillance.
#[derive(Parser, Debug)]
#[command(name = "sessionguard", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "~/.config/sessionguard/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<DaemonCommand>,
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    /// Run the daemon, ingesting JSON-lines events from stdin.
    Run,
    /// Parse the configuration and print the effective settings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_env("SESSIONGUARD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = expand_tilde(&args.config);
    let mut config = GuardConfig::load(&config_path).context("loading configuration")?;
    config.store.data_dir = expand_tilde(
        config
            .store
            .data_dir
            .to_str()
            .unwrap_or("~/.local/share/sessionguard"),
    );

    match args.command {
        Some(DaemonCommand::CheckConfig) => {
            let rendered =
                toml::to_string_pretty(&config).context("rendering effective configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Some(DaemonCommand::Run) | None => run(config).await,
    }
}

async fn run(config: GuardConfig) -> Result<()> {
    info!(data_dir = %config.store.data_dir.display(), "sessionguard daemon starting");
    let daemon = Daemon::new(config)?;

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        tokio::select! {
            result = ingest_stdin(&daemon) => {
                if let Err(e) = result {
                    warn!(error = %e, "event stream failed");
                } else {
                    info!("event stream closed");
                }
            }
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = ingest_stdin(&daemon) => {
                if let Err(e) = result {
                    warn!(error = %e, "event stream failed");
                } else {
                    info!("event stream closed");
                }
            }
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
        }
    }

    daemon.shutdown().await;
    Ok(())
}

/// Read JSON-lines events from stdin and feed them to the pipeline until
/// EOF. Malformed lines and rejected events are logged, never fatal.
async fn ingest_stdin(daemon: &Daemon) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(trimmed) {
            Ok(raw) => {
                if let Err(e) = daemon.submit_event(raw) {
                    warn!(error = %e, "rejected event");
                }
            }
            Err(e) => warn!(error = %e, "malformed event json"),
        }
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        return PathBuf::from("/tmp").join(rest);
    }
    PathBuf::from(path)
}
