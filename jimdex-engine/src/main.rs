//! jimdex-engine - Jim Index directory service
//!
//! Ingests announcement and recommendation records pushed by stream bridges,
//! enriches entries from their info/reserves endpoints and serves the ranked
//! directory over HTTP + SSE.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jimdex_common::config::{load_or_default, resolve_config_path, CONFIG_ENV_VAR};
use jimdex_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jimdex_engine::config::EngineSettings;
use jimdex_engine::session::SessionManager;
use jimdex_engine::subscriptions::{run_ingest, ChannelSubscriptions};
use jimdex_engine::AppState;

const MODULE_NAME: &str = "jimdex-engine";

/// Command-line arguments for jimdex-engine
#[derive(Parser, Debug)]
#[command(name = "jimdex-engine")]
#[command(about = "Jim Index directory reconciliation service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "JIMDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "JIMDEX_PORT")]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR, MODULE_NAME);
    let mut config = load_or_default(config_path.as_deref()).context("Failed to load config")?;

    let level = if args.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("jimdex_engine={level},jimdex_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jimdex-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }

    if let Some(port) = args.port {
        config.port = port;
    }
    let settings = EngineSettings::from_toml(&config).context("Invalid configuration")?;

    let event_bus = EventBus::new(settings.event_bus_capacity);
    let tasks = TaskTracker::new();
    let cancel = CancellationToken::new();

    let engine = jimdex_engine::build_engine(&settings, event_bus.clone(), tasks.clone(), cancel.clone())?;

    let (subscriptions, records) =
        ChannelSubscriptions::channel(settings.ingest_queue_capacity, event_bus.clone());
    let subscriptions = Arc::new(subscriptions);
    let ingest = tokio::spawn(run_ingest(
        engine.clone(),
        records,
        settings.records,
        cancel.clone(),
    ));

    let session = Arc::new(SessionManager::new(
        engine.clone(),
        subscriptions.clone(),
        event_bus.clone(),
    ));

    let state = AppState::new(engine.clone(), session, subscriptions);
    let app = jimdex_engine::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_addr))?;
    info!("Listening on http://{}", settings.listen_addr);
    info!("Health check: http://{}/health", settings.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    match ingest.await {
        Ok(stats) => info!(received = stats.received, "Ingest stopped"),
        Err(e) => warn!(error = %e, "Ingest task ended abnormally"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
