//! Transport headers carrying signature metadata and location claims
//!
//! - `Signature-Input: keyid="<key hash>", created=<epoch>, expires=<epoch>, alg="<alg>", nonce="<value>"`
//! - `Signature: <hex>`
//! - `Workload-Geo-ID: {"client_workload_id": ..., "client_workload_location": {...}}`
//!
//! These let the gateway authenticate and geo-check a request without parsing
//! the body.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::types::GeographicRegion;

pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
pub const SIGNATURE_HEADER: &str = "signature";
pub const WORKLOAD_GEO_HEADER: &str = "workload-geo-id";

/// Parsed `Signature-Input` header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureInput {
    /// Public key hash of the signer
    pub key_id: String,
    pub created: Option<i64>,
    pub expires: Option<i64>,
    pub alg: Option<String>,
    pub nonce: Option<String>,
}

fn malformed(header: &'static str, reason: impl Into<String>) -> CoreError {
    CoreError::MalformedHeader {
        header,
        reason: reason.into(),
    }
}

/// Split `key=value` parameters separated by `,` or `;`, honouring quotes
fn parameters(input: &str) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',' || *c == ';') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' || c == ';' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(malformed(
                "Signature-Input",
                format!("parameter '{}' has no value", key.trim()),
            ));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(malformed("Signature-Input", "unterminated quoted value"));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c == ';' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.push((key.trim().to_ascii_lowercase(), value));
    }
    Ok(params)
}

impl SignatureInput {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            ..Default::default()
        }
    }

    pub fn parse(header: &str) -> Result<Self> {
        let mut input = SignatureInput::default();
        let epoch = |name: &str, value: &str| -> Result<i64> {
            value
                .parse()
                .map_err(|_| malformed("Signature-Input", format!("{} is not an integer", name)))
        };

        for (key, value) in parameters(header)? {
            match key.as_str() {
                "keyid" => input.key_id = value,
                "created" => input.created = Some(epoch("created", &value)?),
                "expires" => input.expires = Some(epoch("expires", &value)?),
                "alg" => input.alg = Some(value),
                "nonce" => input.nonce = Some(value),
                _ => {}
            }
        }

        if input.key_id.trim().is_empty() {
            return Err(malformed("Signature-Input", "keyid is required"));
        }
        Ok(input)
    }
}

impl fmt::Display for SignatureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyid=\"{}\"", self.key_id)?;
        if let Some(created) = self.created {
            write!(f, ", created={}", created)?;
        }
        if let Some(expires) = self.expires {
            write!(f, ", expires={}", expires)?;
        }
        if let Some(alg) = &self.alg {
            write!(f, ", alg=\"{}\"", alg)?;
        }
        if let Some(nonce) = &self.nonce {
            write!(f, ", nonce=\"{}\"", nonce)?;
        }
        Ok(())
    }
}

/// Parsed `Workload-Geo-ID` header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadGeoId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_workload_id: Option<String>,
    #[serde(default)]
    pub client_workload_location: GeographicRegion,
}

impl WorkloadGeoId {
    pub fn parse(header: &str) -> Result<Self> {
        let parsed: WorkloadGeoId = serde_json::from_str(header)
            .map_err(|e| malformed("Workload-Geo-ID", e.to_string()))?;
        Ok(WorkloadGeoId {
            client_workload_location: parsed.client_workload_location.normalized(),
            ..parsed
        })
    }

    pub fn to_header_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Extract the bare hex from a `Signature` header
///
/// Accepts either plain hex or the structured `label=:hex:` form.
pub fn parse_signature(header: &str) -> Result<String> {
    let value = header.trim();
    let value = match value.split_once('=') {
        Some((_, rest)) => rest.trim().trim_matches(':'),
        None => value,
    };
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed("Signature", "expected hex-encoded signature"));
    }
    Ok(value.to_ascii_lowercase())
}
