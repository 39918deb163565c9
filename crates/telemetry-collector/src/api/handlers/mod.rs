//! API request handlers

pub mod agents;
pub mod metrics;
pub mod nonce;
pub mod nonces;

pub use agents::{get_agent, list_agents, reload_agents, ListAgentsResponse, ReloadResponse};
pub use metrics::{submit_metrics, SubmitResponse};
pub use nonce::{issue_nonce, NonceQuery, NonceResponse};
pub use nonces::{cleanup_nonces, nonce_stats, CleanupResponse, NonceStatsResponse};

use std::sync::Arc;
use telemetry_core::{
    AgentRegistry, CoreError, GeoPolicyEngine, NonceStore, PipelineConfig, ValidationPipeline,
};

use crate::config::CollectorConfig;
use crate::sink::TelemetrySink;

/// Application state shared across handlers
pub struct AppState {
    /// Collector configuration
    pub config: CollectorConfig,
    /// Registered agents
    pub registry: Arc<AgentRegistry>,
    /// Outstanding nonces
    pub nonces: Arc<NonceStore>,
    /// Full validation pipeline
    pub pipeline: ValidationPipeline,
    /// Destination for accepted telemetry
    pub sink: Arc<dyn TelemetrySink>,
}

impl AppState {
    pub fn new(
        config: CollectorConfig,
        registry: Arc<AgentRegistry>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, CoreError> {
        let nonces = Arc::new(NonceStore::new(config.nonce_config()));
        Self::with_nonce_store(config, registry, nonces, sink)
    }

    /// Build state around an existing nonce store
    pub fn with_nonce_store(
        config: CollectorConfig,
        registry: Arc<AgentRegistry>,
        nonces: Arc<NonceStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, CoreError> {
        let pipeline = ValidationPipeline::new(
            PipelineConfig::collector().with_nonce_binding(config.bind_nonce_owner),
            Arc::clone(&registry),
            Some(Arc::clone(&nonces)),
            GeoPolicyEngine::new(Some(config.allowed_geo.clone())),
        )?;

        Ok(Self {
            config,
            registry,
            nonces,
            pipeline,
            sink,
        })
    }
}
