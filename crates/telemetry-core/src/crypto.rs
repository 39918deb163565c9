//! Key material and digest algorithms
//!
//! Agents hold an Ed25519 key pair; the collector and gateway only ever see
//! the public half, registered in the allowlist. A key is identified on the
//! wire by its `key_hash`: the lowercase hex SHA-256 of the raw 32 public-key
//! bytes.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair held by an agent
//! - `PublicKey`: Ed25519 public key with its precomputed key hash
//! - `SignatureAlgorithm`: digest applied to `canonical || nonce` before signing

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Length of a hex-encoded Ed25519 signature
pub const SIGNATURE_HEX_LEN: usize = 128;

/// Compute the key hash of raw public-key bytes
pub fn key_hash(public_key: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key))
}

/// Short, log-safe prefix of an identifier
pub fn fingerprint(value: &str) -> String {
    let end = value
        .char_indices()
        .nth(16)
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    format!("{}...", &value[..end])
}

/// Digest applied to the signed message before the Ed25519 signature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    /// Wire name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha384 => "sha384",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            SignatureAlgorithm::Sha256 => run::<Sha256>(parts),
            SignatureAlgorithm::Sha384 => run::<Sha384>(parts),
            SignatureAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(SignatureAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(SignatureAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(SignatureAlgorithm::Sha512),
            _ => Err(CoreError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Ed25519 key pair held by an agent
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_hash", &self.public_key.key_hash)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey::from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Create a key pair from raw secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Get the raw signing key bytes
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Ed25519 public key registered for an agent
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
    key_hash: String,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_hash", &self.key_hash)
            .finish()
    }
}

impl PublicKey {
    fn from_verifying_key(verifying_key: VerifyingKey) -> Self {
        let key_hash = key_hash(verifying_key.as_bytes());
        Self {
            verifying_key,
            key_hash,
        }
    }

    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Ok(Self::from_verifying_key(verifying_key))
    }

    /// Decode a base64-encoded public key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD.decode(encoded.trim())?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Base64 encoding of the raw key bytes
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.as_bytes())
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Hex SHA-256 of the raw key bytes
    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    /// Short fingerprint suitable for responses and logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key_hash)
    }

    /// Verify a raw signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature_bytes: [u8; 64] = signature.try_into().map_err(|_| {
            CoreError::CryptoError(format!(
                "invalid signature length: {}",
                signature.len()
            ))
        })?;
        let signature = Signature::from_bytes(&signature_bytes);
        self.verifying_key
            .verify(message, &signature)
            .map_err(CoreError::from)
    }
}
