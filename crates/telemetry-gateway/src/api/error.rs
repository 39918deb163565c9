//! API error types and responses

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::any::Any;
use telemetry_core::{failure_body, CoreError, Layer, Rejection, RejectionKind};
use thiserror::Error;
use tracing::{error, warn};

use crate::rate_limit::RateLimited;
use crate::relay::RelayError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Allowlist reload failed: {0}")]
    ReloadFailed(String),

    /// Internal failure; the message is logged, never returned
    #[error("Internal error: {0}")]
    Internal(String),

    /// Protocol validation failure at the edge
    #[error("{0}")]
    Rejected(Rejection),

    #[error("Rate limit exceeded")]
    RateLimited(RateLimited),

    /// Collector could not be reached
    #[error(transparent)]
    Relay(#[from] RelayError),
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Non-protocol failure rendered in the rejection body shape
fn failure(status: StatusCode, code: &str, validation_type: &str, message: &str) -> Response {
    let body = failure_body(
        Layer::Gateway,
        code,
        validation_type,
        message,
        Value::Null,
        &now(),
    );
    (status, Json(body)).into_response()
}

fn internal_error_response() -> Response {
    failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "internal",
        "Internal server error",
    )
}

fn rejection_response(rejection: &Rejection) -> Response {
    let status = StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(rejection.to_body(&now()))).into_response()
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
            ApiError::Rejected(rejection) => rejection_response(&rejection),
            ApiError::RateLimited(limited) => {
                let retry_after = limited.retry_after_secs();
                let rejection = Rejection::new(
                    Layer::Gateway,
                    RejectionKind::RateLimited,
                    format!(
                        "Rate limit of {} requests per {}s exceeded",
                        limited.limit, limited.window_secs
                    ),
                )
                .with_details(json!({
                    "limit": limited.limit,
                    "window_secs": limited.window_secs,
                    "retry_after": retry_after,
                }));
                let mut response = rejection_response(&rejection);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            ApiError::Relay(err) => {
                warn!(error = %err, "Collector unavailable");
                failure(
                    StatusCode::BAD_GATEWAY,
                    "COLLECTOR_UNAVAILABLE",
                    "relay",
                    "Collector is unavailable",
                )
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
