//! Telemetry Collector Binary
//!
//! Runs the collector HTTP server with its background nonce sweeper.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use telemetry_collector::{
    create_router, spawn_sweeper, AppState, CollectorConfig, LoggingSink, TelemetrySink,
};
use telemetry_core::AgentRegistry;

#[tokio::main]
async fn main() {
    let config = match CollectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Collector failed");
        std::process::exit(1);
    }
}

async fn run(config: CollectorConfig) -> Result<(), Box<dyn Error>> {
    // Unreadable or invalid allowlist is fatal at startup
    let registry = Arc::new(AgentRegistry::from_file(&config.allowlist_path)?);
    let sink: Arc<dyn TelemetrySink> = Arc::new(LoggingSink::new());

    let port = config.port;
    let sweep_every = Duration::from_secs(config.sweep_interval_secs);

    info!(
        collector_id = %config.collector_id,
        agents = registry.len(),
        allowlist = %config.allowlist_path.display(),
        nonce_ttl_secs = config.nonce_ttl_secs,
        port = port,
        "Starting telemetry collector"
    );

    let state = Arc::new(AppState::new(config, registry, sink)?);
    let _sweeper = spawn_sweeper(Arc::clone(&state.nonces), sweep_every);

    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Collector listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Collector stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
