//! Local gateway endpoints
//!
//! These are answered by the gateway itself and never relayed.

use axum::{
    extract::{Path, Request, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use telemetry_core::AgentSummary;

use super::{client_key, AppState};
use crate::api::error::ApiError;
use crate::rate_limit::RateLimitStatus;

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationFlags {
    pub public_key_hash: bool,
    pub signature: bool,
    pub geolocation: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests: usize,
    pub window_secs: u64,
    pub tracked_clients: usize,
}

/// GET /gateway/status
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayStatusResponse {
    pub gateway_id: String,
    pub collector_url: String,
    pub validation: ValidationFlags,
    pub enabled_stages: Vec<String>,
    pub rate_limit: RateLimitSettings,
    pub relay_timeout_secs: u64,
    pub registered_agents: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct RateLimitsResponse {
    pub client: String,
    pub rate_limit: RateLimitStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub allowed_agents: Vec<String>,
    pub count: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub agent_count: usize,
    pub timestamp: String,
}

pub async fn gateway_status(State(state): State<Arc<AppState>>) -> Json<GatewayStatusResponse> {
    let config = &state.config;
    Json(GatewayStatusResponse {
        gateway_id: config.gateway_id.clone(),
        collector_url: config.collector_url.clone(),
        validation: ValidationFlags {
            public_key_hash: config.validate_public_key_hash,
            signature: config.validate_signature,
            geolocation: config.validate_geolocation,
        },
        enabled_stages: state.edge.enabled_stages().into_iter().map(String::from).collect(),
        rate_limit: RateLimitSettings {
            requests: state.limiter.limit(),
            window_secs: state.limiter.window().as_secs(),
            tracked_clients: state.limiter.tracked_clients(),
        },
        relay_timeout_secs: config.relay_timeout_secs,
        registered_agents: state.registry.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Caller's remaining budget; does not count against it
///
/// GET /gateway/rate-limits
pub async fn rate_limits(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Json<RateLimitsResponse> {
    let client = client_key(request.extensions());
    Json(RateLimitsResponse {
        rate_limit: state.limiter.status(&client),
        client,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /agents
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ListAgentsResponse> {
    let allowed_agents = state.registry.agent_ids();
    Json(ListAgentsResponse {
        count: allowed_agents.len(),
        allowed_agents,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /agents/{id}
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentSummary>, ApiError> {
    state
        .registry
        .lookup_by_id(&agent_id)
        .map(|entry| Json(entry.summary()))
        .ok_or_else(|| ApiError::NotFound(format!("Agent '{}' is not registered", agent_id)))
}

/// POST /agents/reload
pub async fn reload_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let agent_count = state.registry.reload()?;
    info!(agents = agent_count, "Gateway allowlist reloaded via API");

    Ok(Json(ReloadResponse {
        status: "reloaded".into(),
        agent_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
