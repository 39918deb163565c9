//! Nonce Issuance Handler
//!
//! Issues a single-use nonce to a registered agent. The caller names itself by
//! agent id or public key hash; an optional `Signature-Input` header must carry
//! the key hash registered for that agent. Only the allowlist check applies.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use telemetry_core::{
    crypto::fingerprint, headers::SIGNATURE_INPUT_HEADER, Layer, NonceRequest, Rejection,
    SignatureInput,
};

use super::AppState;
use crate::api::error::ApiError;

/// Query parameters of a nonce request
#[derive(Debug, Default, Deserialize)]
pub struct NonceQuery {
    pub agent_id: Option<String>,
    pub public_key_hash: Option<String>,
}

/// Response from nonce issuance
#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    /// Hex nonce to bind into the signature
    pub nonce: String,
    /// Seconds until the nonce expires
    pub expires_in: i64,
    pub timestamp: String,
    /// Short prefix of the caller's key hash
    pub identity_fingerprint: String,
    pub agent_id: String,
}

/// Structural rejection for an unreadable identity query
fn identity_query_rejection(err: &QueryRejection, layer: Layer) -> Rejection {
    Rejection::structural(layer, "Malformed identity query")
        .with_details(serde_json::json!({ "reason": err.body_text() }))
}

/// Parse an optional `Signature-Input` header
pub(crate) fn signature_input(
    headers: &HeaderMap,
    layer: Layer,
) -> Result<Option<SignatureInput>, Rejection> {
    let Some(value) = headers.get(SIGNATURE_INPUT_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| Rejection::structural(layer, "Signature-Input header is not valid text"))?;
    SignatureInput::parse(value)
        .map(Some)
        .map_err(|e| Rejection::structural(layer, e.to_string()))
}

/// Issue a nonce
///
/// GET /nonce?agent_id=<id> or GET /nonce?public_key_hash=<hash>
pub async fn issue_nonce(
    State(state): State<Arc<AppState>>,
    query: Result<Query<NonceQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<NonceResponse>, ApiError> {
    let Query(query) = query.map_err(|e| identity_query_rejection(&e, Layer::Collector))?;
    let header = signature_input(&headers, Layer::Collector)?;

    let request = NonceRequest {
        agent_id: query.agent_id,
        public_key_hash: query.public_key_hash,
        header_key_id: header.map(|h| h.key_id),
    };
    let agent = state.pipeline.authorize_nonce_request(&request)?;

    // Opportunistic cleanup before issuing
    state.nonces.sweep();
    let nonce = state.nonces.issue(&agent.agent_id);

    info!(
        agent_id = %agent.agent_id,
        nonce = %fingerprint(&nonce),
        "Issued nonce"
    );

    Ok(Json(NonceResponse {
        nonce,
        expires_in: state.nonces.ttl().num_seconds(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        identity_fingerprint: agent.public_key.fingerprint(),
        agent_id: agent.agent_id.clone(),
    }))
}
