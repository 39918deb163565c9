//! Configuration-driven validation pipeline
//!
//! The collector and the gateway run the same ordered stage list with
//! different [`PipelineConfig`]s:
//!
//! 1. Structural: claims needed by the enabled stages are present
//! 2. Nonce: active, and optionally bound to the claimed owner
//! 3. Signature: canonical payload verified against the agent's key
//! 4. Agent: allowlist membership and service scope
//! 5. Geolocation: global allow-list and per-agent policy
//! 6. Nonce consumption
//!
//! The first failing stage short-circuits with a [`Rejection`]. Consumption
//! runs last so a request that fails any check never burns the agent's nonce.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::canonical::CanonicalVerifier;
use crate::crypto::fingerprint;
use crate::error::{CoreError, Result};
use crate::geo::GeoPolicyEngine;
use crate::nonce::NonceStore;
use crate::registry::{AgentEntry, AgentRegistry};
use crate::types::SubmissionClaims;
use crate::validation::{Layer, Rejection, RejectionKind, StageResult};

/// How a request names its agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Claimed `agent_id`, cross-checked against any claimed key hash
    AgentId,
    /// Hash of the public key from the `Signature-Input` header
    KeyHash,
}

/// Which stages run and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub layer: Layer,
    pub identity: IdentityMode,
    pub validate_nonce: bool,
    pub bind_nonce_owner: bool,
    pub verify_signature: bool,
    pub verify_agent: bool,
    pub verify_geolocation: bool,
    pub consume_nonce: bool,
}

impl PipelineConfig {
    /// Every stage enabled, identity by agent id
    pub fn collector() -> Self {
        Self {
            layer: Layer::Collector,
            identity: IdentityMode::AgentId,
            validate_nonce: true,
            bind_nonce_owner: true,
            verify_signature: true,
            verify_agent: true,
            verify_geolocation: true,
            consume_nonce: true,
        }
    }

    /// Every stage disabled, identity by key hash
    pub fn gateway() -> Self {
        Self {
            layer: Layer::Gateway,
            identity: IdentityMode::KeyHash,
            validate_nonce: false,
            bind_nonce_owner: false,
            verify_signature: false,
            verify_agent: false,
            verify_geolocation: false,
            consume_nonce: false,
        }
    }

    pub fn with_signature(mut self, enabled: bool) -> Self {
        self.verify_signature = enabled;
        self
    }

    pub fn with_agent(mut self, enabled: bool) -> Self {
        self.verify_agent = enabled;
        self
    }

    pub fn with_geolocation(mut self, enabled: bool) -> Self {
        self.verify_geolocation = enabled;
        self
    }

    pub fn with_nonce_binding(mut self, enabled: bool) -> Self {
        self.bind_nonce_owner = enabled;
        self
    }

    fn needs_nonce(&self) -> bool {
        self.validate_nonce || self.consume_nonce || self.verify_signature
    }

    /// Names of the enabled stages, in order
    pub fn enabled_stages(&self) -> Vec<&'static str> {
        [
            (true, "structural"),
            (self.validate_nonce, "nonce"),
            (self.verify_signature, "signature"),
            (self.verify_agent, "agent"),
            (self.verify_geolocation, "geolocation"),
            (self.consume_nonce, "consume_nonce"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// A submission that passed every enabled stage
#[derive(Debug, Clone)]
pub struct Accepted {
    /// Resolved agent, if any stage needed it
    pub agent: Option<Arc<AgentEntry>>,
    pub nonce_consumed: bool,
}

/// Identity presented when requesting a nonce
#[derive(Debug, Clone, Default)]
pub struct NonceRequest {
    pub agent_id: Option<String>,
    pub public_key_hash: Option<String>,
    /// `keyid` from a `Signature-Input` header
    pub header_key_id: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_key_hash(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_agent_id(value: &str) -> bool {
    value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Ordered validation stages over shared protocol state
pub struct ValidationPipeline {
    config: PipelineConfig,
    registry: Arc<AgentRegistry>,
    nonces: Option<Arc<NonceStore>>,
    geo: GeoPolicyEngine,
}

impl ValidationPipeline {
    /// Build a pipeline; nonce stages require a nonce store
    pub fn new(
        config: PipelineConfig,
        registry: Arc<AgentRegistry>,
        nonces: Option<Arc<NonceStore>>,
        geo: GeoPolicyEngine,
    ) -> Result<Self> {
        if (config.validate_nonce || config.consume_nonce) && nonces.is_none() {
            return Err(CoreError::InvalidConfig(
                "nonce validation requires a nonce store".into(),
            ));
        }
        Ok(Self {
            config,
            registry,
            nonces,
            geo,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    fn reject(&self, kind: RejectionKind, message: impl Into<String>) -> Rejection {
        Rejection::new(self.config.layer, kind, message)
    }

    /// Run every enabled stage over `claims`
    pub fn validate(&self, claims: &SubmissionClaims) -> StageResult<Accepted> {
        match self.run(claims) {
            Ok(accepted) => {
                info!(
                    layer = %self.config.layer,
                    agent_id = accepted.agent.as_ref().map(|a| a.agent_id.as_str()).unwrap_or("-"),
                    nonce_consumed = accepted.nonce_consumed,
                    "Submission accepted"
                );
                Ok(accepted)
            }
            Err(rejection) => {
                warn!(
                    layer = %rejection.rejected_by,
                    kind = %rejection.kind,
                    validation_type = %rejection.validation_type(),
                    agent_id = claims.agent_id.as_deref().unwrap_or("-"),
                    reason = %rejection.message,
                    "Submission rejected"
                );
                Err(rejection)
            }
        }
    }

    fn run(&self, claims: &SubmissionClaims) -> StageResult<Accepted> {
        let mut agent: Option<Arc<AgentEntry>> = None;

        self.check_structure(claims)?;

        if self.config.validate_nonce {
            self.check_nonce(claims)?;
        }

        if self.config.verify_signature {
            let entry = self.resolve(claims, &mut agent)?;
            self.check_signature(claims, &entry)?;
        }

        if self.config.verify_agent {
            let entry = self.resolve(claims, &mut agent)?;
            self.check_agent(claims, &entry)?;
        }

        if self.config.verify_geolocation {
            self.check_geolocation(claims, &mut agent)?;
        }

        let mut nonce_consumed = false;
        if self.config.consume_nonce {
            self.consume(claims)?;
            nonce_consumed = true;
        }

        Ok(Accepted {
            agent,
            nonce_consumed,
        })
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn check_structure(&self, claims: &SubmissionClaims) -> StageResult {
        let layer = self.config.layer;

        if self.config.needs_nonce() && present(&claims.nonce).is_none() {
            return Err(Rejection::missing_field(layer, "nonce", "non-empty string"));
        }

        if self.config.verify_signature {
            match &claims.signed {
                Some(signed) if !signed.signature.trim().is_empty() => {}
                _ => return Err(Rejection::missing_field(layer, "signature", "hex string")),
            }
        }

        let needs_identity = self.config.verify_signature
            || self.config.verify_agent
            || (self.config.validate_nonce && self.config.bind_nonce_owner)
            || (self.config.verify_geolocation && claims.geo_claim.is_some());
        if needs_identity {
            match self.config.identity {
                IdentityMode::AgentId if present(&claims.agent_id).is_none() => {
                    return Err(Rejection::missing_field(layer, "agent_id", "non-empty string"));
                }
                IdentityMode::KeyHash if present(&claims.key_hash).is_none() => {
                    return Err(Rejection::missing_field(
                        layer,
                        "Signature-Input.keyid",
                        "public key hash",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve the agent once and reuse it for later stages
    fn resolve(
        &self,
        claims: &SubmissionClaims,
        slot: &mut Option<Arc<AgentEntry>>,
    ) -> StageResult<Arc<AgentEntry>> {
        if let Some(entry) = slot {
            return Ok(Arc::clone(entry));
        }

        let entry = match self.config.identity {
            IdentityMode::AgentId => {
                let id = present(&claims.agent_id).unwrap_or_default();
                let entry = self.registry.lookup_by_id(id).ok_or_else(|| {
                    self.reject(RejectionKind::AgentNotFound, "Agent is not in the allowlist")
                        .with_details(serde_json::json!({ "agent_id": id }))
                })?;
                if let Some(hash) = present(&claims.key_hash) {
                    if !hash.eq_ignore_ascii_case(entry.key_hash()) {
                        return Err(self
                            .reject(
                                RejectionKind::AgentVerificationFailed,
                                "Public key hash does not match the key registered for this agent",
                            )
                            .with_details(serde_json::json!({
                                "agent_id": id,
                                "received_key_hash": fingerprint(hash),
                            })));
                    }
                }
                entry
            }
            IdentityMode::KeyHash => {
                let hash = present(&claims.key_hash).unwrap_or_default();
                let entry = self.registry.lookup_by_key_hash(hash).ok_or_else(|| {
                    self.reject(RejectionKind::AgentNotFound, "Public key is not in the allowlist")
                        .with_details(serde_json::json!({ "public_key_hash": fingerprint(hash) }))
                })?;
                if let Some(claimed) = present(&claims.agent_id) {
                    if claimed != entry.agent_id {
                        return Err(self
                            .reject(
                                RejectionKind::AgentVerificationFailed,
                                "Claimed agent identity does not match the signing key",
                            )
                            .with_details(serde_json::json!({
                                "claimed_agent_id": claimed,
                                "key_agent_id": entry.agent_id,
                            })));
                    }
                }
                entry
            }
        };

        debug!(agent_id = %entry.agent_id, key = %entry.public_key.fingerprint(), "Resolved agent");
        *slot = Some(Arc::clone(&entry));
        Ok(entry)
    }

    fn nonce_store(&self) -> StageResult<&NonceStore> {
        self.nonces.as_deref().ok_or_else(|| {
            self.reject(RejectionKind::NonceInvalid, "Nonce validation is unavailable")
        })
    }

    fn check_nonce(&self, claims: &SubmissionClaims) -> StageResult {
        let store = self.nonce_store()?;
        let nonce = present(&claims.nonce).unwrap_or_default();

        let active = if self.config.bind_nonce_owner {
            let owner = match self.config.identity {
                IdentityMode::AgentId => present(&claims.agent_id).map(str::to_string),
                IdentityMode::KeyHash => present(&claims.key_hash)
                    .and_then(|h| self.registry.lookup_by_key_hash(h))
                    .map(|e| e.agent_id.clone()),
            };
            owner.is_some_and(|o| store.is_active_for(nonce, &o))
        } else {
            store.is_active(nonce)
        };

        if !active {
            return Err(self
                .reject(
                    RejectionKind::NonceInvalid,
                    "Nonce is unknown, expired, already used, or issued to another agent",
                )
                .with_details(serde_json::json!({ "nonce": fingerprint(nonce) })));
        }
        Ok(())
    }

    fn check_signature(&self, claims: &SubmissionClaims, agent: &AgentEntry) -> StageResult {
        let nonce = present(&claims.nonce).unwrap_or_default();
        let Some(signed) = &claims.signed else {
            return Err(Rejection::missing_field(self.config.layer, "signature", "hex string"));
        };

        if !CanonicalVerifier::verify(
            &signed.fields,
            nonce,
            &signed.signature,
            &signed.algorithm,
            &agent.public_key,
        ) {
            return Err(self
                .reject(RejectionKind::SignatureInvalid, "Signature verification failed")
                .with_details(serde_json::json!({
                    "agent_id": agent.agent_id,
                    "algorithm": signed.algorithm,
                    "key": agent.public_key.fingerprint(),
                })));
        }
        Ok(())
    }

    fn check_agent(&self, claims: &SubmissionClaims, agent: &AgentEntry) -> StageResult {
        if let Some(service) = present(&claims.service) {
            if !agent.allows_service(service) {
                return Err(self
                    .reject(
                        RejectionKind::AgentVerificationFailed,
                        format!("Service '{}' is not permitted for this agent", service),
                    )
                    .with_details(serde_json::json!({
                        "agent_id": agent.agent_id,
                        "service": service,
                        "allowed_services": agent.allowed_services,
                    })));
            }
        }
        Ok(())
    }

    fn check_geolocation(
        &self,
        claims: &SubmissionClaims,
        slot: &mut Option<Arc<AgentEntry>>,
    ) -> StageResult {
        let Some(claim) = &claims.geo_claim else {
            debug!(layer = %self.config.layer, "No geolocation claim, skipping geo policy");
            return Ok(());
        };
        let agent = self.resolve(claims, slot)?;

        self.geo
            .evaluate(
                claim,
                Some(&agent.agent_id),
                &agent.geo_policy,
                claims.device_geolocation.as_ref(),
            )
            .map_err(|mismatch| {
                self.reject(
                    RejectionKind::GeolocationPolicyViolation,
                    format!("Geolocation policy violation: {}", mismatch),
                )
                .with_details(mismatch.details())
            })
    }

    fn consume(&self, claims: &SubmissionClaims) -> StageResult {
        let store = self.nonce_store()?;
        let nonce = present(&claims.nonce).unwrap_or_default();
        if !store.consume(nonce) {
            return Err(self
                .reject(RejectionKind::NonceInvalid, "Nonce was already used")
                .with_details(serde_json::json!({ "nonce": fingerprint(nonce) })));
        }
        Ok(())
    }

    // =========================================================================
    // Nonce issuance
    // =========================================================================

    /// Authorize a nonce request; only the allowlist check applies
    pub fn authorize_nonce_request(&self, request: &NonceRequest) -> StageResult<Arc<AgentEntry>> {
        let layer = self.config.layer;
        let agent_id = present(&request.agent_id);
        let header_key = present(&request.header_key_id);
        let mut key_hash = present(&request.public_key_hash);

        if self.config.identity == IdentityMode::KeyHash {
            if header_key.is_none() {
                return Err(Rejection::missing_field(
                    layer,
                    "Signature-Input.keyid",
                    "public key hash",
                ));
            }
            key_hash = key_hash.or(header_key);
        }

        if agent_id.is_none() && key_hash.is_none() {
            return Err(Rejection::structural(
                layer,
                "agent_id or public_key_hash query parameter is required",
            ));
        }
        if let Some(id) = agent_id {
            if !is_agent_id(id) {
                return Err(Rejection::missing_field(layer, "agent_id", "agent identifier"));
            }
        }
        if let Some(hash) = key_hash {
            if !is_key_hash(hash) {
                return Err(Rejection::missing_field(layer, "public_key_hash", "64 hex characters"));
            }
        }

        let entry = match (agent_id, key_hash) {
            (Some(id), hash) => {
                let entry = self.registry.lookup_by_id(id).ok_or_else(|| {
                    self.reject(RejectionKind::AgentNotFound, "Agent is not in the allowlist")
                        .with_details(serde_json::json!({ "agent_id": id }))
                })?;
                if hash.is_some_and(|h| !h.eq_ignore_ascii_case(entry.key_hash())) {
                    return Err(self.reject(
                        RejectionKind::AgentVerificationFailed,
                        "agent_id and public_key_hash identify different agents",
                    ));
                }
                entry
            }
            (None, Some(hash)) => self.registry.lookup_by_key_hash(hash).ok_or_else(|| {
                self.reject(RejectionKind::AgentNotFound, "Public key is not in the allowlist")
                    .with_details(serde_json::json!({ "public_key_hash": fingerprint(hash) }))
            })?,
            (None, None) => return Err(Rejection::structural(layer, "No identity supplied")),
        };

        if let Some(key_id) = header_key {
            if !key_id.eq_ignore_ascii_case(entry.key_hash()) {
                return Err(self
                    .reject(
                        RejectionKind::AgentVerificationFailed,
                        "Signature-Input keyid does not match the registered key",
                    )
                    .with_details(serde_json::json!({ "agent_id": entry.agent_id })));
            }
        }

        Ok(entry)
    }
}
