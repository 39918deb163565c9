//! Telemetry Collector
//!
//! The backend service of the signed telemetry protocol. It:
//! - Issues single-use nonces to registered agents
//! - Runs every validation stage over submitted telemetry
//! - Consumes the nonce only once a submission has passed every check
//! - Sweeps expired and consumed nonces in the background
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness with nonce and agent counts
//! - `GET /nonce?agent_id=<id>` - Issue a nonce (or `?public_key_hash=<hash>`)
//! - `POST /metrics` - Submit signed telemetry
//! - `GET /agents` - List registered agent ids
//! - `GET /agents/{id}` - Public view of one agent
//! - `POST /agents/reload` - Atomically reload the allowlist file
//! - `GET /nonces/stats` - Nonce store diagnostics
//! - `POST /nonces/cleanup` - Trigger a sweep

pub mod api;
pub mod config;
pub mod sink;
pub mod sweeper;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{CollectorConfig, ConfigError};
pub use sink::{LoggingSink, SinkError, TelemetrySink};
pub use sweeper::spawn_sweeper;
