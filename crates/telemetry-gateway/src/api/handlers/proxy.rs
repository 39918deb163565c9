//! Relayed endpoints
//!
//! `/nonce` and `/metrics` run the enabled edge checks before relaying; every
//! other path is relayed untouched. Rate limiting happens in middleware before
//! any of these run.

use axum::{
    body::{to_bytes, Bytes},
    extract::{rejection::QueryRejection, Query, Request, State},
    http::request::Parts,
};
use std::sync::Arc;
use tracing::debug;

use telemetry_core::{Layer, Rejection, MAX_SUBMISSION_BYTES};

use super::AppState;
use crate::api::error::ApiError;
use crate::relay::RelayedResponse;

/// Query parameters of a nonce request
#[derive(Debug, Default, serde::Deserialize)]
pub struct NonceQuery {
    pub agent_id: Option<String>,
    pub public_key_hash: Option<String>,
}

fn path_and_query(parts: &Parts) -> &str {
    parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

async fn split(request: Request) -> Result<(Parts, Bytes), ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_SUBMISSION_BYTES).await.map_err(|_| {
        Rejection::structural(
            Layer::Gateway,
            format!("Request body exceeds {} bytes", MAX_SUBMISSION_BYTES),
        )
    })?;
    Ok((parts, bytes))
}

async fn forward(
    state: &AppState,
    parts: Parts,
    body: Bytes,
) -> Result<RelayedResponse, ApiError> {
    Ok(state
        .relay
        .forward(parts.method.clone(), path_and_query(&parts), &parts.headers, body)
        .await?)
}

/// GET /nonce
pub async fn issue_nonce(
    State(state): State<Arc<AppState>>,
    query: Result<Query<NonceQuery>, QueryRejection>,
    request: Request,
) -> Result<RelayedResponse, ApiError> {
    let Query(query) = query.map_err(|e| {
        Rejection::structural(Layer::Gateway, "Malformed identity query")
            .with_details(serde_json::json!({ "reason": e.body_text() }))
    })?;
    let (parts, body) = split(request).await?;

    let agent = state
        .edge
        .authorize_nonce(&parts.headers, query.agent_id, query.public_key_hash)?;
    if let Some(agent) = agent {
        debug!(agent_id = %agent.agent_id, "Nonce request passed edge allowlist");
    }

    forward(&state, parts, body).await
}

/// POST /metrics
pub async fn submit_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<RelayedResponse, ApiError> {
    let (parts, body) = split(request).await?;

    state.edge.validate_submission(&parts.headers, &body)?;

    forward(&state, parts, body).await
}

/// Everything else goes straight through
pub async fn relay_any(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<RelayedResponse, ApiError> {
    let (parts, body) = split(request).await?;
    forward(&state, parts, body).await
}
