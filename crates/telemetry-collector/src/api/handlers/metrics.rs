//! Metrics Submission Handler
//!
//! Runs the full validation pipeline over a submission and, only when every
//! stage passes, hands it to the telemetry sink:
//! 1. Structural validation of the JSON body
//! 2. Nonce validation bound to the claimed agent
//! 3. Signature verification against the registered key
//! 4. Allowlist and service scope
//! 5. Geographic policy
//! 6. Nonce consumption

use axum::{
    body::to_bytes,
    extract::{Request, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use telemetry_core::{Layer, Rejection, Submission, MAX_SUBMISSION_BYTES};

use super::AppState;
use crate::api::error::ApiError;

/// Acknowledgment of an accepted submission
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub message: String,
    pub processing_id: String,
    pub agent_id: String,
    pub collector_id: String,
    pub timestamp: String,
}

/// Accept a signed telemetry submission
///
/// POST /metrics
pub async fn submit_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<SubmitResponse>, ApiError> {
    let body = to_bytes(request.into_body(), MAX_SUBMISSION_BYTES)
        .await
        .map_err(|_| {
            Rejection::structural(
                Layer::Collector,
                format!("Request body exceeds {} bytes", MAX_SUBMISSION_BYTES),
            )
        })?;
    let submission = Submission::from_slice(&body, Layer::Collector)?;

    state.pipeline.validate(&submission.claims())?;

    let processing_id = state
        .sink
        .accept(&submission)
        .await
        .map_err(|e| ApiError::Internal(format!("Telemetry sink failed: {}", e)))?;

    Ok(Json(SubmitResponse {
        status: "success".into(),
        message: "Telemetry accepted".into(),
        processing_id,
        agent_id: submission.agent_id,
        collector_id: state.config.collector_id.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
