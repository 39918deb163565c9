//! Validation results
//!
//! Every stage of the pipeline returns either success or a [`Rejection`].
//! Rejections are plain values so callers can short-circuit with a precise,
//! machine-readable reason and render it however their transport needs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Layer that produced a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Gateway,
    Collector,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Gateway => "gateway",
            Layer::Collector => "collector",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage family a rejection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    StructuralValidation,
    NonceValidation,
    SignatureVerification,
    AgentVerification,
    GeolocationPolicy,
    RateLimit,
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::StructuralValidation => "structural_validation",
            ValidationType::NonceValidation => "nonce_validation",
            ValidationType::SignatureVerification => "signature_verification",
            ValidationType::AgentVerification => "agent_verification",
            ValidationType::GeolocationPolicy => "geolocation_policy",
            ValidationType::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    StructuralError,
    NonceInvalid,
    SignatureInvalid,
    AgentNotFound,
    AgentVerificationFailed,
    GeolocationPolicyViolation,
    RateLimited,
}

impl RejectionKind {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            RejectionKind::StructuralError => "structural_error",
            RejectionKind::NonceInvalid => "nonce_invalid",
            RejectionKind::SignatureInvalid => "signature_invalid",
            RejectionKind::AgentNotFound => "agent_not_found",
            RejectionKind::AgentVerificationFailed => "agent_verification_failed",
            RejectionKind::GeolocationPolicyViolation => "geolocation_policy_violation",
            RejectionKind::RateLimited => "rate_limited",
        }
    }

    pub fn validation_type(&self) -> ValidationType {
        match self {
            RejectionKind::StructuralError => ValidationType::StructuralValidation,
            RejectionKind::NonceInvalid => ValidationType::NonceValidation,
            RejectionKind::SignatureInvalid => ValidationType::SignatureVerification,
            RejectionKind::AgentNotFound | RejectionKind::AgentVerificationFailed => {
                ValidationType::AgentVerification
            }
            RejectionKind::GeolocationPolicyViolation => ValidationType::GeolocationPolicy,
            RejectionKind::RateLimited => ValidationType::RateLimit,
        }
    }

    /// HTTP status code a transport should use for this rejection
    pub fn status_code(&self) -> u16 {
        match self {
            RejectionKind::AgentNotFound | RejectionKind::AgentVerificationFailed => 403,
            RejectionKind::RateLimited => 429,
            _ => 400,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub rejected_by: Layer,
    pub kind: RejectionKind,
    pub message: String,
    pub details: Value,
}

impl Rejection {
    pub fn new(rejected_by: Layer, kind: RejectionKind, message: impl Into<String>) -> Self {
        Self {
            rejected_by,
            kind,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn structural(layer: Layer, message: impl Into<String>) -> Self {
        Self::new(layer, RejectionKind::StructuralError, message)
    }

    /// Structural rejection naming the offending field
    pub fn missing_field(layer: Layer, field: &str, expected: &str) -> Self {
        Self::structural(layer, format!("Missing or invalid field: {}", field))
            .with_details(json!({ "field": field, "expected": expected }))
    }

    pub fn validation_type(&self) -> ValidationType {
        self.kind.validation_type()
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Wire body shared by the collector and the gateway
    pub fn to_body(&self, timestamp: &str) -> Value {
        failure_body(
            self.rejected_by,
            self.kind.code(),
            self.validation_type().as_str(),
            &self.message,
            self.details.clone(),
            timestamp,
        )
    }
}

/// Error body for every non-200 response
///
/// Failures outside the protocol stages (internal errors, relay failures,
/// admin lookups) use the same shape with their own `validation_type`.
pub fn failure_body(
    rejected_by: Layer,
    code: &str,
    validation_type: &str,
    message: &str,
    details: Value,
    timestamp: &str,
) -> Value {
    json!({
        "error": message,
        "code": code,
        "rejected_by": rejected_by,
        "validation_type": validation_type,
        "details": details,
        "timestamp": timestamp,
    })
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected ({}): {}", self.rejected_by, self.kind, self.message)
    }
}

/// Outcome of a single validation stage
pub type StageResult<T = ()> = std::result::Result<T, Rejection>;
