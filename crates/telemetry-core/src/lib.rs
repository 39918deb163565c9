//! # Telemetry Core
//!
//! Nonce-gated signed-submission protocol shared by the telemetry collector
//! and the edge gateway.
//!
//! ## Key Concepts
//!
//! - **Nonce**: single-use random token binding a submission to one issuance
//! - **Canonical form**: deterministic bytes of `{geographic_region, metrics}`
//!   that an agent signs together with the nonce
//! - **Allowlist**: registered agents, their keys, geo policy and service scopes
//! - **Rejection**: a failed validation, carried as a value with a precise reason
//!
//! ## Invariants
//!
//! 1. **Single use**: a consumed or expired nonce is never active again
//! 2. **Owner binding**: a nonce only validates for the agent it was issued to
//! 3. **Fail closed**: unknown agents, bad keys and unknown algorithms reject
//! 4. **Last-step consumption**: a nonce is consumed only after every other
//!    check passed

pub mod canonical;
pub mod crypto;
pub mod env;
pub mod error;
pub mod geo;
pub mod headers;
pub mod nonce;
pub mod pipeline;
pub mod registry;
pub mod shard;
pub mod types;
pub mod validation;

pub use canonical::{CanonicalSigner, CanonicalVerifier, SignableFields};
pub use crypto::{KeyPair, PublicKey, SignatureAlgorithm};
pub use env::{EnvError, EnvReader};
pub use error::{CoreError, Result};
pub use geo::{AgentGeoPolicy, AllowListPolicy, GeoMismatch, GeoPolicyEngine};
pub use headers::{SignatureInput, WorkloadGeoId};
pub use nonce::{Clock, ManualClock, NonceConfig, NonceStats, NonceStore, SystemClock};
pub use pipeline::{Accepted, IdentityMode, NonceRequest, PipelineConfig, ValidationPipeline};
pub use registry::{AgentEntry, AgentRegistry, AgentSummary};
pub use types::{
    GeographicRegion, Submission, SubmissionBuilder, SubmissionClaims, MAX_SUBMISSION_BYTES,
};
pub use validation::{failure_body, Layer, Rejection, RejectionKind, ValidationType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
