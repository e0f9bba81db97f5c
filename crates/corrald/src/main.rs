//! # corrald - Corral cluster daemon
//!
//! Runs on every node of a high-availability cluster. Keeps the node
//! directory (known hosts, cluster registry) replicated across members,
//! relays requests to other daemons and gates local management commands.
//!
//! ## Architecture
//! ```text
//! client → routes → auth → dispatch ──→ other daemons
//!                     ↓        ↑
//!                   gate    cfgsync (periodic fetch/reconcile)
//!                     ↓
//!              management tool
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod auth;
mod cfgsync;
mod cluster;
mod config;
mod dispatch;
mod gate;
mod routes;
mod state;

use config::AppConfig;
use state::AppState;

/// Corral cluster daemon
#[derive(Parser, Debug)]
#[command(name = "corrald")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/corrald.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Node name as known to the cluster (overrides config)
    #[arg(long, env = "CORRAL_NODE_NAME")]
    node_name: Option<String>,

    /// Directory for replicated configs and issued tokens (overrides config)
    #[arg(long, env = "CORRAL_DATA_DIR")]
    data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("🐄 Starting corrald v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    info!(
        "✅ Node directory ready: node={} cluster={}",
        config.node_name,
        config.cluster.name.as_deref().unwrap_or("-")
    );

    // Spawn config sync scheduler
    let sync_control = state.sync.clone();
    let sync_dispatcher = state.dispatcher.clone();
    let sync_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        cfgsync::sync_scheduler(sync_control, sync_dispatcher, sync_shutdown).await;
    });

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 corrald listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("👋 corrald shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
