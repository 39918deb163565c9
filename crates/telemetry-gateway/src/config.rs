//! Gateway configuration from `GATEWAY_*` environment variables

use std::path::PathBuf;
use std::time::Duration;
use telemetry_core::{EnvError, EnvReader, PipelineConfig};
use thiserror::Error;

pub const ENV_PREFIX: &str = "GATEWAY";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Gateway settings
///
/// Every validation flag defaults to false, making the gateway a pure
/// rate-limited relay.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub log_level: String,
    pub gateway_id: String,
    pub allowlist_path: PathBuf,
    /// Base URL of the collector, without trailing slash
    pub collector_url: String,
    pub validate_public_key_hash: bool,
    pub validate_signature: bool,
    pub validate_geolocation: bool,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    pub relay_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            log_level: "info".into(),
            gateway_id: "telemetry-gateway".into(),
            allowlist_path: PathBuf::from("gateway/allowed_agents.json"),
            collector_url: "http://localhost:8500".into(),
            validate_public_key_hash: false,
            validate_signature: false,
            validate_geolocation: false,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            relay_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Read from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(&EnvReader::process(ENV_PREFIX))
    }

    pub fn from_reader<F>(env: &EnvReader<F>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            port: env.parse("PORT", defaults.port)?,
            log_level: env.string("LOG_LEVEL", &defaults.log_level),
            gateway_id: env.string("ID", &defaults.gateway_id),
            allowlist_path: env
                .optional("ALLOWLIST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.allowlist_path),
            collector_url: env
                .string("COLLECTOR_URL", &defaults.collector_url)
                .trim_end_matches('/')
                .to_string(),
            validate_public_key_hash: env
                .flag("VALIDATE_PUBLIC_KEY_HASH", defaults.validate_public_key_hash)?,
            validate_signature: env.flag("VALIDATE_SIGNATURE", defaults.validate_signature)?,
            validate_geolocation: env.flag("VALIDATE_GEOLOCATION", defaults.validate_geolocation)?,
            rate_limit_requests: env.parse("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window_secs: env
                .parse("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?,
            relay_timeout_secs: env.parse("RELAY_TIMEOUT_SECS", defaults.relay_timeout_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_requests == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}_RATE_LIMIT_REQUESTS must be positive",
                ENV_PREFIX
            )));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}_RATE_LIMIT_WINDOW_SECS must be positive",
                ENV_PREFIX
            )));
        }
        if self.relay_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}_RELAY_TIMEOUT_SECS must be positive",
                ENV_PREFIX
            )));
        }
        if !self.collector_url.starts_with("http://") && !self.collector_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "{}_COLLECTOR_URL must be an http(s) URL, got '{}'",
                ENV_PREFIX, self.collector_url
            )));
        }
        Ok(())
    }

    /// Validation stages enabled at the edge
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::gateway()
            .with_agent(self.validate_public_key_hash)
            .with_signature(self.validate_signature)
            .with_geolocation(self.validate_geolocation)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}
