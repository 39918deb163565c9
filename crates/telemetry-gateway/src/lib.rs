//! Telemetry Edge Gateway
//!
//! The gateway sits in front of the collector. For each request it:
//! - Applies a per-client sliding-window rate limit
//! - Runs whichever edge checks are enabled (key-hash allowlist, signature,
//!   geolocation) using the same validation pipeline as the collector
//! - Relays the request verbatim and returns the collector's response verbatim
//!
//! With every check disabled (the default) it is a rate-limited relay; the
//! collector remains authoritative either way and is the only layer that
//! consumes nonces.
//!
//! ## Usage
//!
//! ```ignore
//! use telemetry_gateway::{create_router, AppState, GatewayConfig};
//!
//! let config = GatewayConfig {
//!     validate_public_key_hash: true,
//!     ..GatewayConfig::default()
//! };
//! let state = AppState::new(config, registry)?;
//! let app = create_router(Arc::new(state));
//! ```
//!
//! ## Local Endpoints
//!
//! - `GET /health` - Liveness with enabled stages
//! - `GET /gateway/status` - Configuration and limiter summary
//! - `GET /gateway/rate-limits` - Caller's remaining budget
//! - `GET /agents`, `GET /agents/{id}`, `POST /agents/reload` - Edge allowlist
//!
//! Everything else, including `GET /nonce` and `POST /metrics`, is relayed.

pub mod api;
pub mod config;
pub mod edge;
pub mod rate_limit;
pub mod relay;

pub use api::create_router;
pub use api::handlers::{AppState, StateError};
pub use config::{ConfigError, GatewayConfig};
pub use edge::{EdgeValidator, HeaderClaims};
pub use rate_limit::{RateLimitStatus, RateLimited, RateLimiter};
pub use relay::{ProxyRelay, RelayError, RelayedResponse, GATEWAY_ID_HEADER};
