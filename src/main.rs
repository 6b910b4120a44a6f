#![forbid(unsafe_code)]

//! `agent-sandbox` — sandbox engine host binary.
//!
//! Bootstraps configuration, builds the session registry, tails the engine's
//! broadcast channel into the log, and tears everything down (killing all
//! active child processes) on SIGINT/SIGTERM. The HTTP/SSE route layer is an
//! external collaborator; this host exists for operations and debugging.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_sandbox::config::GlobalConfig;
use agent_sandbox::engine::registry::SessionRegistry;
use agent_sandbox::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-sandbox", about = "Sandboxed command-execution engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default working directory for sessions.
    #[arg(long)]
    working_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-sandbox engine bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(wd) = args.working_dir {
        let canonical = wd
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid working dir override: {err}")))?;
        config.default_working_dir = canonical;
    }

    info!(
        max_sessions = config.max_sessions,
        idle_timeout_s = config.idle_timeout_seconds,
        "configuration loaded"
    );

    // ── Build the engine ────────────────────────────────
    let registry = SessionRegistry::new(config)?;

    // Tail broadcast events into the log so an operator can watch session
    // activity without the route layer attached.
    let mut events = registry.subscribe();
    let event_tail = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    info!(
                        session_id = %event.session_id,
                        kind = ?event.kind,
                        data = event.data.as_deref().unwrap_or(""),
                        "session event"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    error!(missed, "event tail lagged behind the broadcast channel");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("sandbox engine ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    registry.shutdown().await;
    event_tail.abort();
    info!("agent-sandbox shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
