//! Error types for the telemetry protocol core
//!
//! These cover setup-time failures (key decoding, allowlist loading).
//! Per-request protocol failures are never errors: they are [`Rejection`]
//! values returned by the validation pipeline.
//!
//! [`Rejection`]: crate::validation::Rejection

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building protocol state
#[derive(Error, Debug)]
pub enum CoreError {
    /// Public key could not be decoded
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    /// Signing or key-derivation failure
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Signature algorithm name not recognised
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Allowlist file could not be read
    #[error("Failed to read allowlist {path}: {reason}")]
    AllowlistIo { path: String, reason: String },

    /// Allowlist content is malformed
    #[error("Invalid allowlist: {0}")]
    InvalidAllowlist(String),

    /// A single allowlist entry is malformed
    #[error("Invalid agent entry {index}: {reason}")]
    InvalidAgentEntry { index: usize, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Component configured inconsistently
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Header value could not be parsed
    #[error("Malformed header {header}: {reason}")]
    MalformedHeader { header: &'static str, reason: String },
}

impl From<ed25519_dalek::SignatureError> for CoreError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CoreError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for CoreError {
    fn from(err: base64::DecodeError) -> Self {
        CoreError::InvalidKey(format!("invalid base64 encoding: {}", err))
    }
}
