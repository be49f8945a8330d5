//! codecheck-jit - Just-in-time building code acquisition service
//!
//! Loads a jurisdiction's building-code rules on first request: discovers
//! code sources, fetches them, extracts measurable rules (AI with a pattern
//! fallback) and caches them in SQLite. Clients trigger loads and poll
//! status over HTTP, or follow progress on the `/events` SSE stream.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use codecheck_common::config::{self as common_config, ENV_CONFIG};
use codecheck_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codecheck_jit::services::Coordinator;
use codecheck_jit::AppState;

const MODULE_NAME: &str = "codecheck-jit";

/// Command-line arguments for codecheck-jit
#[derive(Parser, Debug)]
#[command(name = "codecheck-jit")]
#[command(about = "Just-in-time building code acquisition service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| common_config::default_config_path(MODULE_NAME));
    let toml_config = match &config_path {
        Some(path) => common_config::load_toml_config(path).context("Failed to load configuration")?,
        None => common_config::TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("codecheck_jit={0},codecheck_common={0},tower_http=info", toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {} (building code acquisition)", MODULE_NAME);
    info!(
        "Version: {} (git {}, built {}, {} profile)",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => warn!("Configuration file {} not found, using defaults", path.display()),
        None => warn!("No configuration directory available, using defaults"),
    }

    let db_path = common_config::resolve_database_path(args.database.as_deref(), &toml_config);
    info!("Database: {}", db_path.display());

    let db_pool = codecheck_jit::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let recovered = codecheck_jit::db::jobs::recover_stale_jobs(&db_pool, toml_config.pipeline.stale_job_timeout())
        .await
        .context("Failed to recover interrupted loads")?;
    if recovered > 0 {
        warn!("Recovered {} interrupted code loads", recovered);
    }

    let event_bus = EventBus::new(256);

    let api_key = codecheck_jit::config::resolve_ai_api_key(&toml_config);
    let coordinator = Coordinator::from_config(db_pool.clone(), event_bus.clone(), &toml_config, api_key)
        .context("Failed to initialize code load pipeline")?;
    if !coordinator.ai_enabled() {
        warn!("AI extraction disabled, loads will record ConfigurationDegraded");
    }

    let state = AppState::new(db_pool, event_bus, coordinator);
    let app = codecheck_jit::build_router(state);

    let host = args.host.unwrap_or_else(|| toml_config.host.clone());
    let port = common_config::resolve_port(args.port, &toml_config);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
