//! Edge validation of submissions before they are relayed
//!
//! The gateway runs the shared [`ValidationPipeline`] with the subset of stages
//! its configuration enables. Claims come from transport headers:
//!
//! - `Signature-Input` keyid and nonce identify the signer
//! - `Signature` mirrors the body signature
//! - `Workload-Geo-ID` carries the location claim
//!
//! The body is parsed only when signature verification is enabled. The gateway
//! never consumes nonces; that stays with the collector.

use axum::http::HeaderMap;
use std::sync::Arc;

use telemetry_core::headers::{
    parse_signature, SIGNATURE_HEADER, SIGNATURE_INPUT_HEADER, WORKLOAD_GEO_HEADER,
};
use telemetry_core::{
    Accepted, AgentEntry, AgentRegistry, CoreError, GeoPolicyEngine, Layer, NonceRequest,
    PipelineConfig, Rejection, RejectionKind, SignatureInput, Submission, SubmissionClaims,
    ValidationPipeline, WorkloadGeoId,
};

const LAYER: Layer = Layer::Gateway;

/// Claims carried in transport headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderClaims {
    pub signature_input: Option<SignatureInput>,
    pub signature: Option<String>,
    pub workload_geo: Option<WorkloadGeoId>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str, label: &str) -> Result<Option<&'a str>, Rejection> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| Rejection::structural(LAYER, format!("{} header is not valid text", label))),
    }
}

fn malformed(err: CoreError) -> Rejection {
    Rejection::structural(LAYER, err.to_string())
}

impl HeaderClaims {
    /// Parse every known header; a malformed one is a structural rejection
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Rejection> {
        let signature_input = header_str(headers, SIGNATURE_INPUT_HEADER, "Signature-Input")?
            .map(SignatureInput::parse)
            .transpose()
            .map_err(malformed)?;
        let signature = header_str(headers, SIGNATURE_HEADER, "Signature")?
            .map(parse_signature)
            .transpose()
            .map_err(malformed)?;
        let workload_geo = header_str(headers, WORKLOAD_GEO_HEADER, "Workload-Geo-ID")?
            .map(WorkloadGeoId::parse)
            .transpose()
            .map_err(malformed)?;

        Ok(Self {
            signature_input,
            signature,
            workload_geo,
        })
    }

    pub fn key_id(&self) -> Option<&str> {
        self.signature_input.as_ref().map(|s| s.key_id.as_str())
    }
}

/// Gateway-side validation
pub struct EdgeValidator {
    pipeline: ValidationPipeline,
}

impl EdgeValidator {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<AgentRegistry>,
        geo: GeoPolicyEngine,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            pipeline: ValidationPipeline::new(config, registry, None, geo)?,
        })
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn enabled_stages(&self) -> Vec<&'static str> {
        self.pipeline.config().enabled_stages()
    }

    /// True when no stage beyond the structural check runs
    pub fn is_pure_relay(&self) -> bool {
        let config = self.pipeline.config();
        !(config.verify_agent || config.verify_signature || config.verify_geolocation)
    }

    /// Assemble pipeline claims from headers, and from the body when needed
    pub fn claims(&self, headers: &HeaderClaims, body: &[u8]) -> Result<SubmissionClaims, Rejection> {
        let mut claims = SubmissionClaims {
            key_hash: headers.key_id().map(str::to_string),
            nonce: headers.signature_input.as_ref().and_then(|s| s.nonce.clone()),
            geo_claim: headers
                .workload_geo
                .as_ref()
                .map(|g| g.client_workload_location.clone())
                .filter(|g| !g.is_empty()),
            ..Default::default()
        };

        if !self.pipeline.config().verify_signature {
            return Ok(claims);
        }

        let submission = Submission::from_slice(body, LAYER)?;
        let body_claims = submission.claims();

        if let (Some(header_sig), Some(signed)) = (&headers.signature, &body_claims.signed) {
            if !header_sig.eq_ignore_ascii_case(signed.signature.trim()) {
                return Err(Rejection::new(
                    LAYER,
                    RejectionKind::SignatureInvalid,
                    "Signature header does not match the body signature",
                ));
            }
        }
        if let (Some(header_nonce), Some(body_nonce)) = (&claims.nonce, &body_claims.nonce) {
            if header_nonce != body_nonce {
                return Err(Rejection::new(
                    LAYER,
                    RejectionKind::NonceInvalid,
                    "Signature-Input nonce does not match the body nonce",
                ));
            }
        }
        if let (Some(header_key), Some(body_key)) = (&claims.key_hash, &body_claims.key_hash) {
            if !header_key.eq_ignore_ascii_case(body_key) {
                return Err(Rejection::new(
                    LAYER,
                    RejectionKind::AgentVerificationFailed,
                    "Signature-Input keyid does not match the body public_key_hash",
                ));
            }
        }

        claims.agent_id = body_claims.agent_id;
        claims.key_hash = claims.key_hash.or(body_claims.key_hash);
        claims.nonce = body_claims.nonce;
        claims.signed = body_claims.signed;
        claims.geo_claim = claims.geo_claim.or(body_claims.geo_claim);
        claims.device_geolocation = body_claims.device_geolocation;
        claims.service = body_claims.service;
        Ok(claims)
    }

    /// Validate a metrics submission
    pub fn validate_submission(&self, headers: &HeaderMap, body: &[u8]) -> Result<Accepted, Rejection> {
        if self.is_pure_relay() {
            return Ok(Accepted {
                agent: None,
                nonce_consumed: false,
            });
        }
        let header_claims = HeaderClaims::from_headers(headers)?;
        let claims = self.claims(&header_claims, body)?;
        self.pipeline.validate(&claims)
    }

    /// Allowlist check on a nonce request, when the agent stage is enabled
    pub fn authorize_nonce(
        &self,
        headers: &HeaderMap,
        agent_id: Option<String>,
        public_key_hash: Option<String>,
    ) -> Result<Option<Arc<AgentEntry>>, Rejection> {
        if !self.pipeline.config().verify_agent {
            return Ok(None);
        }
        let header_claims = HeaderClaims::from_headers(headers)?;
        let request = NonceRequest {
            agent_id,
            public_key_hash,
            header_key_id: header_claims.key_id().map(str::to_string),
        };
        self.pipeline.authorize_nonce_request(&request).map(Some)
    }
}
