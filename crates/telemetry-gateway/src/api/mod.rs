//! API module for the edge gateway

pub mod error;
pub mod handlers;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use error::ApiError;
use handlers::{client_key, AppState};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub gateway_id: String,
    pub collector_url: String,
    pub enabled_stages: Vec<String>,
    pub timestamp: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: "telemetry-gateway".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        gateway_id: state.config.gateway_id.clone(),
        collector_url: state.config.collector_url.clone(),
        enabled_stages: state.edge.enabled_stages().into_iter().map(String::from).collect(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Per-client rate limit in front of every relayed route
pub async fn enforce_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(request.extensions());
    match state.limiter.check(&client) {
        Ok(_) => next.run(request).await,
        Err(limited) => {
            warn!(
                client = %client,
                path = %request.uri().path(),
                retry_after = limited.retry_after_secs(),
                "Rate limit exceeded"
            );
            ApiError::RateLimited(limited).into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Relayed to the collector, rate limited
    let relayed = Router::new()
        .route("/nonce", get(handlers::issue_nonce))
        .route("/metrics", post(handlers::submit_metrics))
        .fallback(handlers::relay_any)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            enforce_rate_limit,
        ));

    Router::new()
        // Answered locally
        .route("/health", get(health))
        .route("/gateway/status", get(handlers::gateway_status))
        .route("/gateway/rate-limits", get(handlers::rate_limits))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/reload", post(handlers::reload_agents))
        .route("/agents/{id}", get(handlers::get_agent))
        .merge(relayed)
        // Middleware
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
