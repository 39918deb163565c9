//! API module for the telemetry collector

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub collector_id: String,
    pub active_nonces: usize,
    pub registered_agents: usize,
    pub timestamp: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: "telemetry-collector".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        collector_id: state.config.collector_id.clone(),
        active_nonces: state.nonces.active_count(),
        registered_agents: state.registry.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // Protocol endpoints
        .route("/nonce", get(handlers::issue_nonce))
        .route("/metrics", post(handlers::submit_metrics))
        // Allowlist management
        .route("/agents", get(handlers::list_agents))
        .route("/agents/reload", post(handlers::reload_agents))
        .route("/agents/{id}", get(handlers::get_agent))
        // Nonce diagnostics
        .route("/nonces/stats", get(handlers::nonce_stats))
        .route("/nonces/cleanup", post(handlers::cleanup_nonces))
        // Middleware
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
