//! idun — session credential refresh service.
//!
//! Serves a browser form and a JSON API that forwards a platform session
//! cookie to a configurable upstream refresh endpoint and returns the
//! refreshed cookie, with opt-in profile/games enrichment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod client;
mod config;
mod health;
mod metrics;
mod upstream;

use api::AppState;
use config::Config;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "idun")]
#[command(author, version, about = "Session credential refresh service")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default)
    Run {
        /// Config file path (server, upstream endpoints, logging)
        #[arg(short, long, default_value = "idun.yaml", value_name = "PATH")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Config file path
        #[arg(short, long, default_value = "idun.yaml", value_name = "PATH")]
        config: PathBuf,
    },
}

/// Path to idun config for the selected command. Default "idun.yaml" when no
/// subcommand (implicit run).
fn idun_config_path(cli: &Cli) -> PathBuf {
    match &cli.command {
        None => PathBuf::from("idun.yaml"),
        Some(Commands::Run { config }) => config.clone(),
        Some(Commands::Validate { config }) => config.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Validate { config }) => {
            init_logging(None, &cli);
            run_validate(config)
        }
        _ => {
            let config_path = idun_config_path(&cli);
            let config = Config::load(&config_path)?;
            init_logging(Some(&config), &cli);
            run_server(&config).await
        }
    }
}

/// Init tracing from config (log_format, log_level) or env. Config takes
/// precedence; env IDUN_LOG_FORMAT, IDUN_LOG_LEVEL (or RUST_LOG when no
/// config) override.
fn init_logging(config: Option<&Config>, cli: &Cli) {
    let use_json = match config.and_then(|c| c.global.log_format.as_deref()) {
        Some("json") => true,
        _ => std::env::var("IDUN_LOG_FORMAT").as_deref() == Ok("json"),
    };
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("idun=debug")
    } else {
        let level = match config {
            Some(c) => std::env::var("IDUN_LOG_LEVEL")
                .ok()
                .and_then(|s| {
                    let s = s.trim();
                    if s.is_empty() {
                        None
                    } else {
                        Some(s.to_string())
                    }
                })
                .unwrap_or_else(|| c.global.log_level.clone()),
            None => std::env::var("RUST_LOG")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
        };
        let filter_str = format!("idun={}", level);
        if config.is_some() {
            EnvFilter::new(filter_str)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str))
        }
    };
    if use_json {
        let json_fmt = tracing_subscriber::fmt::format()
            .json()
            .with_current_span(false)
            .with_span_list(false);
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .event_format(json_fmt),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    }
}

fn run_validate(config_path: &std::path::Path) -> anyhow::Result<()> {
    match Config::load(config_path) {
        Ok(_) => {
            tracing::info!("config valid");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!("config invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_server(config: &Config) -> anyhow::Result<()> {
    if config
        .global
        .metrics
        .as_ref()
        .map(|m| m.enabled)
        .unwrap_or(false)
        && let Err(e) = metrics::init()
    {
        tracing::warn!("metrics init failed: {}", e);
    }

    let client = client::build_client(config.upstream.resilience.as_ref())?;
    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        last_errors: Arc::new(RwLock::new(HashMap::new())),
        started_at: Instant::now(),
    });

    let addr: SocketAddr = format!(
        "{}:{}",
        config.global.server.address, config.global.server.port
    )
    .parse()
    .map_err(|e| anyhow::anyhow!("server address invalid: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening; form on GET /, API on POST /api/v1/refresh");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("graceful shutdown complete");
    Ok(())
}

/// Future that completes when SIGINT (Ctrl+C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
