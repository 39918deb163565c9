//! Collector configuration from `COLLECTOR_*` environment variables

use chrono::Duration;
use std::path::PathBuf;
use telemetry_core::{AllowListPolicy, EnvError, EnvReader, NonceConfig};
use thiserror::Error;

pub const ENV_PREFIX: &str = "COLLECTOR";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Collector settings
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub port: u16,
    pub log_level: String,
    pub collector_id: String,
    pub allowlist_path: PathBuf,
    pub nonce_ttl_secs: i64,
    pub nonce_length: usize,
    pub sweep_interval_secs: u64,
    pub bind_nonce_owner: bool,
    /// Global geographic allow-list; unset dimensions are unchecked
    pub allowed_geo: AllowListPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            port: 8500,
            log_level: "info".into(),
            collector_id: "telemetry-collector".into(),
            allowlist_path: PathBuf::from("collector/allowed_agents.json"),
            nonce_ttl_secs: telemetry_core::nonce::DEFAULT_NONCE_TTL_SECS,
            nonce_length: telemetry_core::nonce::DEFAULT_NONCE_LENGTH,
            sweep_interval_secs: 60,
            bind_nonce_owner: true,
            allowed_geo: AllowListPolicy::default(),
        }
    }
}

impl CollectorConfig {
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
            collector_id: env.string("ID", &defaults.collector_id),
            allowlist_path: env
                .optional("ALLOWLIST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.allowlist_path),
            nonce_ttl_secs: env.parse("NONCE_TTL_SECS", defaults.nonce_ttl_secs)?,
            nonce_length: env.parse("NONCE_LENGTH", defaults.nonce_length)?,
            sweep_interval_secs: env.parse("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            bind_nonce_owner: env.flag("BIND_NONCE_OWNER", defaults.bind_nonce_owner)?,
            allowed_geo: AllowListPolicy::new(
                env.list("ALLOWED_REGIONS"),
                env.list("ALLOWED_STATES"),
                env.list("ALLOWED_CITIES"),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.nonce_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "{}_NONCE_TTL_SECS must be positive",
                ENV_PREFIX
            )));
        }
        if self.nonce_length < 16 {
            return Err(ConfigError::Invalid(format!(
                "{}_NONCE_LENGTH must be at least 16 bytes",
                ENV_PREFIX
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}_SWEEP_INTERVAL_SECS must be positive",
                ENV_PREFIX
            )));
        }
        Ok(())
    }

    pub fn nonce_config(&self) -> NonceConfig {
        NonceConfig {
            ttl: Duration::seconds(self.nonce_ttl_secs),
            length: self.nonce_length,
        }
    }
}
