//! Nonce Diagnostics Handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use telemetry_core::NonceStats;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct NonceStatsResponse {
    pub nonce_statistics: NonceStats,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub status: String,
    pub cleaned_count: usize,
    pub remaining_count: usize,
}

/// GET /nonces/stats
pub async fn nonce_stats(State(state): State<Arc<AppState>>) -> Json<NonceStatsResponse> {
    Json(NonceStatsResponse {
        nonce_statistics: state.nonces.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Manual sweep trigger
///
/// POST /nonces/cleanup
pub async fn cleanup_nonces(State(state): State<Arc<AppState>>) -> Json<CleanupResponse> {
    let cleaned_count = state.nonces.sweep();
    let remaining_count = state.nonces.active_count();
    info!(cleaned = cleaned_count, remaining = remaining_count, "Manual nonce cleanup");

    Json(CleanupResponse {
        status: "success".into(),
        cleaned_count,
        remaining_count,
    })
}
