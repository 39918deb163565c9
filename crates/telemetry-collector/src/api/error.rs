//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::any::Any;
use telemetry_core::{failure_body, CoreError, Layer, Rejection};
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Allowlist reload failed; the previous table stays active
    #[error("Allowlist reload failed: {0}")]
    ReloadFailed(String),

    /// Internal failure; the message is logged, never returned
    #[error("Internal error: {0}")]
    Internal(String),

    /// Protocol validation failure
    #[error("{0}")]
    Rejected(Rejection),
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Non-protocol failure rendered in the rejection body shape
fn failure(status: StatusCode, code: &str, validation_type: &str, message: &str) -> Response {
    let body = failure_body(
        Layer::Collector,
        code,
        validation_type,
        message,
        Value::Null,
        &now(),
    );
    (status, Json(body)).into_response()
}

/// Generic 500 body with no internal detail
pub fn internal_error_response() -> Response {
    failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "internal",
        "Internal server error",
    )
}

/// Response for a panicking handler, used by `CatchPanicLayer`
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");
    internal_error_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Rejected(rejection) => {
                let status = StatusCode::from_u16(rejection.status_code())
                    .unwrap_or(StatusCode::BAD_REQUEST);
                (status, Json(rejection.to_body(&now()))).into_response()
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                internal_error_response()
            }
            ApiError::NotFound(msg) => failure(StatusCode::NOT_FOUND, "NOT_FOUND", "lookup", &msg),
            ApiError::ReloadFailed(msg) => failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "RELOAD_FAILED",
                "allowlist_reload",
                &format!("Allowlist reload failed: {}", msg),
            ),
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        ApiError::Rejected(rejection)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidAllowlist(_)
            | CoreError::InvalidAgentEntry { .. }
            | CoreError::AllowlistIo { .. }
            | CoreError::InvalidConfig(_) => ApiError::ReloadFailed(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
