//! Telemetry hand-off
//!
//! Accepted submissions are passed to a [`TelemetrySink`]. The default
//! [`LoggingSink`] only logs the submission and assigns it a processing id;
//! deployments that store or forward telemetry provide their own sink.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use telemetry_core::Submission;
use tracing::info;

/// Error type for sink operations
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected submission: {0}")]
    Rejected(String),
}

/// Receiver of fully validated submissions
#[async_trait]
pub trait TelemetrySink: Send + Sync + Debug {
    /// Hand off one submission, returning its processing id
    async fn accept(&self, submission: &Submission) -> Result<String, SinkError>;
}

/// Sink that logs accepted submissions
#[derive(Debug, Default)]
pub struct LoggingSink {
    accepted: AtomicU64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TelemetrySink for LoggingSink {
    async fn accept(&self, submission: &Submission) -> Result<String, SinkError> {
        let processing_id = uuid::Uuid::new_v4().to_string();
        self.accepted.fetch_add(1, Ordering::Relaxed);
        info!(
            processing_id = %processing_id,
            agent_id = %submission.agent_id,
            service = submission.service_name().unwrap_or("-"),
            region = submission.geographic_region.region.as_deref().unwrap_or("-"),
            "Telemetry accepted"
        );
        Ok(processing_id)
    }
}
