//! Canonical serialization, signing and verification of submissions
//!
//! The signed message is `canonical_bytes(signable_fields) || nonce_bytes`,
//! digested with the named [`SignatureAlgorithm`] and signed with Ed25519.
//!
//! Canonical bytes are compact JSON with object keys sorted bytewise at every
//! level. The writer here does its own key ordering so the output never
//! depends on which map representation `serde_json` was built with.
//!
//! Verification always re-derives the canonical bytes from the submitted
//! objects and fails closed: malformed keys, unknown algorithms and decode
//! errors all yield `false`, with the failing sub-step logged.

use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::crypto::{KeyPair, PublicKey, SignatureAlgorithm};
use crate::error::{CoreError, Result};

/// The subset of a submission covered by the signature
#[derive(Debug, Clone, PartialEq)]
pub struct SignableFields {
    /// Metrics object as submitted
    pub metrics: Value,
    /// Geographic region claim as submitted
    pub geographic_region: Value,
}

impl SignableFields {
    /// Create signable fields from the two submitted objects
    pub fn new(metrics: Value, geographic_region: Value) -> Self {
        Self {
            metrics,
            geographic_region,
        }
    }

    /// Deterministic byte encoding of the signable object
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        out.push(b'{');
        write_key(&mut out, "geographic_region")?;
        write_canonical(&self.geographic_region, &mut out)?;
        out.push(b',');
        write_key(&mut out, "metrics")?;
        write_canonical(&self.metrics, &mut out)?;
        out.push(b'}');
        Ok(out)
    }
}

/// Write `value` as canonical JSON
pub fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_key(out, key)?;
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

fn write_key(out: &mut Vec<u8>, key: &str) -> Result<()> {
    serde_json::to_writer(&mut *out, key)?;
    out.push(b':');
    Ok(())
}

/// Canonical JSON of an arbitrary value
pub fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Sub-step of verification that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    LookupAlgorithm,
    DecodeSignature,
    Canonicalize,
    Verify,
}

impl VerifyStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStep::LookupAlgorithm => "lookup_algorithm",
            VerifyStep::DecodeSignature => "decode_signature",
            VerifyStep::Canonicalize => "canonicalize",
            VerifyStep::Verify => "verify",
        }
    }
}

impl fmt::Display for VerifyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification failure with the sub-step that produced it
#[derive(Debug)]
pub struct VerifyFailure {
    pub step: VerifyStep,
    pub error: CoreError,
}

/// Digest of the signed message for a submission
pub fn message_digest(
    fields: &SignableFields,
    nonce: &str,
    algorithm: SignatureAlgorithm,
) -> Result<Vec<u8>> {
    let canonical = fields.canonical_bytes()?;
    Ok(algorithm.digest(&[&canonical, nonce.as_bytes()]))
}

/// Signs signable fields bound to a nonce
pub struct CanonicalSigner<'a> {
    key_pair: &'a KeyPair,
    algorithm: SignatureAlgorithm,
}

impl<'a> CanonicalSigner<'a> {
    pub fn new(key_pair: &'a KeyPair) -> Self {
        Self {
            key_pair,
            algorithm: SignatureAlgorithm::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Sign and return the hex-encoded signature
    pub fn sign(&self, fields: &SignableFields, nonce: &str) -> Result<String> {
        let digest = message_digest(fields, nonce, self.algorithm)?;
        Ok(hex::encode(self.key_pair.sign(&digest)))
    }
}

/// Verifies submission signatures against an agent's registered key
pub struct CanonicalVerifier;

impl CanonicalVerifier {
    /// Verify, reporting which sub-step failed
    pub fn try_verify(
        fields: &SignableFields,
        nonce: &str,
        signature_hex: &str,
        algorithm: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<(), VerifyFailure> {
        let algorithm: SignatureAlgorithm = algorithm.parse().map_err(|error| VerifyFailure {
            step: VerifyStep::LookupAlgorithm,
            error,
        })?;

        let signature = hex::decode(signature_hex.trim()).map_err(|e| VerifyFailure {
            step: VerifyStep::DecodeSignature,
            error: CoreError::CryptoError(format!("invalid hex signature: {}", e)),
        })?;

        let digest = message_digest(fields, nonce, algorithm).map_err(|error| VerifyFailure {
            step: VerifyStep::Canonicalize,
            error,
        })?;

        public_key
            .verify(&digest, &signature)
            .map_err(|error| VerifyFailure {
                step: VerifyStep::Verify,
                error,
            })
    }

    /// Verify a signature; never errors, every failure is `false`
    pub fn verify(
        fields: &SignableFields,
        nonce: &str,
        signature_hex: &str,
        algorithm: &str,
        public_key: &PublicKey,
    ) -> bool {
        match Self::try_verify(fields, nonce, signature_hex, algorithm, public_key) {
            Ok(()) => {
                debug!(key = %public_key.fingerprint(), algorithm, "Signature verified");
                true
            }
            Err(failure) => {
                warn!(
                    step = %failure.step,
                    error = %failure.error,
                    key = %public_key.fingerprint(),
                    algorithm,
                    "Signature verification failed"
                );
                false
            }
        }
    }
}
