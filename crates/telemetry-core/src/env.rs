//! Typed environment settings
//!
//! Both services read their configuration from prefixed environment variables
//! (`COLLECTOR_PORT`, `GATEWAY_VALIDATE_SIGNATURE`, ...). Malformed values are
//! errors, never silently replaced by the default. Empty values count as unset.

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// A setting that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {var}: {reason}")]
pub struct EnvError {
    pub var: String,
    pub reason: String,
}

/// Reads prefixed settings through a lookup function
pub struct EnvReader<F> {
    prefix: String,
    lookup: F,
}

impl EnvReader<fn(&str) -> Option<String>> {
    /// Reader over the process environment
    pub fn process(prefix: &str) -> Self {
        fn lookup(name: &str) -> Option<String> {
            std::env::var(name).ok()
        }
        EnvReader::new(prefix, lookup as fn(&str) -> Option<String>)
    }
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    pub fn new(prefix: &str, lookup: F) -> Self {
        Self {
            prefix: prefix.to_string(),
            lookup,
        }
    }

    /// Full variable name for `name`
    pub fn key(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn invalid(&self, name: &str, reason: impl Into<String>) -> EnvError {
        EnvError {
            var: self.key(name),
            reason: reason.into(),
        }
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.raw(name)
    }

    pub fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    pub fn parse<T>(&self, name: &str, default: T) -> Result<T, EnvError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|e: T::Err| self.invalid(name, format!("'{}': {}", value, e))),
        }
    }

    /// Boolean flag: true/false, 1/0, yes/no, on/off (any case)
    pub fn flag(&self, name: &str, default: bool) -> Result<bool, EnvError> {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(self.invalid(name, format!("'{}' is not a boolean", value))),
            },
        }
    }

    /// Comma-separated list; unset or empty yields `None`
    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .raw(name)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }
}
