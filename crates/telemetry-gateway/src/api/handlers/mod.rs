//! API request handlers

pub mod admin;
pub mod proxy;

pub use admin::{
    gateway_status, get_agent, list_agents, rate_limits, reload_agents, GatewayStatusResponse,
    RateLimitsResponse,
};
pub use proxy::{issue_nonce, relay_any, submit_metrics};

use axum::extract::ConnectInfo;
use axum::http::Extensions;
use std::net::SocketAddr;
use std::sync::Arc;
use telemetry_core::{AgentRegistry, GeoPolicyEngine};

use crate::config::GatewayConfig;
use crate::edge::EdgeValidator;
use crate::rate_limit::RateLimiter;
use crate::relay::{ProxyRelay, RelayError};

/// Application state shared across handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<AgentRegistry>,
    pub edge: EdgeValidator,
    pub limiter: RateLimiter,
    pub relay: ProxyRelay,
}

/// Failures assembling gateway state
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Core(#[from] telemetry_core::CoreError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl AppState {
    pub fn new(config: GatewayConfig, registry: Arc<AgentRegistry>) -> Result<Self, StateError> {
        let edge = EdgeValidator::new(
            config.pipeline_config(),
            Arc::clone(&registry),
            GeoPolicyEngine::default(),
        )?;
        let limiter = RateLimiter::new(config.rate_limit_requests, config.rate_limit_window());
        let relay = ProxyRelay::new(
            &config.collector_url,
            &config.gateway_id,
            config.relay_timeout(),
        )?;

        Ok(Self {
            config,
            registry,
            edge,
            limiter,
            relay,
        })
    }
}

/// Rate-limit key for a request: the peer IP when known
pub fn client_key(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}
