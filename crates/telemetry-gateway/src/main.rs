//! Telemetry Gateway Binary
//!
//! Runs the edge gateway in front of a telemetry collector.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use telemetry_core::AgentRegistry;
use telemetry_gateway::{create_router, AppState, GatewayConfig};

#[tokio::main]
async fn main() {
    let config = match GatewayConfig::from_env() {
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
        error!(error = %e, "Gateway failed");
        std::process::exit(1);
    }
}

/// Load the edge allowlist
///
/// Only fatal when an enabled check needs it; a pure relay starts with an
/// empty table.
fn load_registry(config: &GatewayConfig) -> Result<AgentRegistry, telemetry_core::CoreError> {
    let needs_allowlist =
        config.validate_public_key_hash || config.validate_signature || config.validate_geolocation;

    match AgentRegistry::from_file(&config.allowlist_path) {
        Ok(registry) => Ok(registry),
        Err(e) if !needs_allowlist => {
            warn!(
                allowlist = %config.allowlist_path.display(),
                error = %e,
                "No edge allowlist loaded; running as pure relay"
            );
            AgentRegistry::new(Vec::new())
        }
        Err(e) => Err(e),
    }
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn Error>> {
    let registry = Arc::new(load_registry(&config)?);
    let port = config.port;

    info!(
        gateway_id = %config.gateway_id,
        collector = %config.collector_url,
        validate_public_key_hash = config.validate_public_key_hash,
        validate_signature = config.validate_signature,
        validate_geolocation = config.validate_geolocation,
        rate_limit = config.rate_limit_requests,
        window_secs = config.rate_limit_window_secs,
        agents = registry.len(),
        port = port,
        "Starting telemetry gateway"
    );

    let state = Arc::new(AppState::new(config, registry)?);

    // Forget clients idle for a whole window
    let pruner = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(pruner.limiter.window());
        interval.tick().await;
        loop {
            interval.tick().await;
            pruner.limiter.prune();
        }
    });

    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
