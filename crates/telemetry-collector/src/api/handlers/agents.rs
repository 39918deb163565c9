//! Agent Allowlist Handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use telemetry_core::AgentSummary;

use super::AppState;
use crate::api::error::ApiError;

/// Response listing registered agents
#[derive(Debug, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub allowed_agents: Vec<String>,
    pub count: usize,
    pub timestamp: String,
}

/// Response from an allowlist reload
#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub agent_count: usize,
    pub timestamp: String,
}

/// List registered agent ids
///
/// GET /agents
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ListAgentsResponse> {
    let allowed_agents = state.registry.agent_ids();
    Json(ListAgentsResponse {
        count: allowed_agents.len(),
        allowed_agents,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Public view of one agent
///
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

/// Atomically reload the allowlist from its backing file
///
/// POST /agents/reload
pub async fn reload_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let agent_count = state.registry.reload()?;
    info!(agents = agent_count, "Allowlist reloaded via API");

    Ok(Json(ReloadResponse {
        status: "reloaded".into(),
        agent_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
