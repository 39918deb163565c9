//! Attack Scenario Tests
//!
//! Each test drives the shared validation pipeline through a concrete attack
//! or failure pattern and checks both the rejection and its side effects on
//! the nonce table.

use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use telemetry_core::{
    AgentEntry, AgentGeoPolicy, AgentRegistry, AllowListPolicy, GeoPolicyEngine,
    GeographicRegion, KeyPair, Layer, NonceStore, PipelineConfig, RejectionKind, Submission,
    SubmissionBuilder, SubmissionClaims, ValidationPipeline, ValidationType,
};

// =============================================================================
// Test Helpers
// =============================================================================

struct Deployment {
    agent: KeyPair,
    registry: Arc<AgentRegistry>,
    nonces: Arc<NonceStore>,
    collector: ValidationPipeline,
}

fn home() -> GeographicRegion {
    GeographicRegion::new("US").with_state("California").with_city("Santa Clara")
}

fn deployment() -> Deployment {
    let agent = KeyPair::generate();
    let other = KeyPair::generate();
    let registry = Arc::new(
        AgentRegistry::new(vec![
            AgentEntry::new("agent-001", agent.public_key().clone())
                .with_geo_policy(AgentGeoPolicy::Expected(home())),
            AgentEntry::new("agent-002", other.public_key().clone()),
        ])
        .unwrap(),
    );
    let nonces = Arc::new(NonceStore::default());
    let collector = ValidationPipeline::new(
        PipelineConfig::collector(),
        registry.clone(),
        Some(nonces.clone()),
        GeoPolicyEngine::new(Some(AllowListPolicy::new(
            Some(vec!["US".into()]),
            None,
            None,
        ))),
    )
    .unwrap();

    Deployment {
        agent,
        registry,
        nonces,
        collector,
    }
}

fn signed_body(d: &Deployment, nonce: &str, region: &GeographicRegion) -> Value {
    SubmissionBuilder::new("agent-001", &d.agent)
        .metrics(json!({"service": {"name": "edge-sensor"}, "cpu_percent": 41.5}))
        .region(region)
        .build(nonce)
        .unwrap()
}

fn claims(body: &Value) -> SubmissionClaims {
    Submission::from_json(body, Layer::Collector).unwrap().claims()
}

// =============================================================================
// ATTACK: Replay
// =============================================================================

/// A captured, fully valid submission is replayed after it was accepted.
/// The nonce is already consumed, so the pipeline stops at the nonce stage.
#[test]
fn attack_replay_rejected_at_nonce_stage() {
    let d = deployment();
    let nonce = d.nonces.issue("agent-001");
    let body = signed_body(&d, &nonce, &home());

    d.collector.validate(&claims(&body)).unwrap();

    // Tamper with the signature too: the nonce stage must reject first
    let mut replay = body.clone();
    replay["signature"] = json!("00".repeat(64));
    let err = d.collector.validate(&claims(&replay)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::NonceInvalid);
    assert_eq!(err.validation_type(), ValidationType::NonceValidation);
    assert_eq!(err.rejected_by, Layer::Collector);
}

// =============================================================================
// FAILURE: Bad signature does not burn the nonce
// =============================================================================

/// An invalid signature is rejected without consuming the nonce, and a
/// corrected resubmission within the TTL succeeds.
#[test]
fn invalid_signature_leaves_nonce_usable() {
    let d = deployment();
    let nonce = d.nonces.issue("agent-001");
    let good = signed_body(&d, &nonce, &home());

    let mut bad = good.clone();
    bad["metrics"]["cpu_percent"] = json!(99.9);
    let err = d.collector.validate(&claims(&bad)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::SignatureInvalid);
    assert_eq!(err.validation_type(), ValidationType::SignatureVerification);
    assert!(d.nonces.is_active(&nonce));

    let accepted = d.collector.validate(&claims(&good)).unwrap();
    assert!(accepted.nonce_consumed);
}

// =============================================================================
// ATTACK: Nonce theft
// =============================================================================

/// Agent 002 obtains a nonce and agent 001's signed payload is submitted with
/// it. Owner binding rejects the nonce.
#[test]
fn attack_nonce_issued_to_other_agent() {
    let d = deployment();
    let stolen = d.nonces.issue("agent-002");
    let body = signed_body(&d, &stolen, &home());

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::NonceInvalid);
    assert!(d.nonces.is_active_for(&stolen, "agent-002"));
}

// =============================================================================
// ATTACK: Identity forgery
// =============================================================================

/// An attacker signs with their own key but claims agent-001's identity.
#[test]
fn attack_forged_agent_id() {
    let d = deployment();
    let attacker = KeyPair::generate();
    let nonce = d.nonces.issue("agent-001");
    let body = SubmissionBuilder::new("agent-001", &attacker)
        .region(&home())
        .without_key_hash()
        .build(&nonce)
        .unwrap();

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::SignatureInvalid);
    assert!(d.nonces.is_active(&nonce));
}

/// The attacker also includes their own key hash; the mismatch is a hard
/// agent rejection.
#[test]
fn attack_forged_agent_id_with_own_key_hash() {
    let d = deployment();
    let attacker = KeyPair::generate();
    let nonce = d.nonces.issue("agent-001");
    let body = SubmissionBuilder::new("agent-001", &attacker)
        .region(&home())
        .build(&nonce)
        .unwrap();

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::AgentVerificationFailed);
    assert_eq!(err.status_code(), 403);
}

/// An id that is not in the allowlist is never silently accepted.
#[test]
fn unregistered_agent_fails_closed() {
    let d = deployment();
    assert!(d.registry.lookup_by_id("agent-404").is_none());

    let ghost = KeyPair::generate();
    let nonce = d.nonces.issue("agent-404");
    let body = SubmissionBuilder::new("agent-404", &ghost)
        .region(&home())
        .without_key_hash()
        .build(&nonce)
        .unwrap();

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::AgentNotFound);
}

// =============================================================================
// ATTACK: Location spoofing
// =============================================================================

/// A correctly signed claim from the wrong location fails the agent's policy.
#[test]
fn attack_signed_claim_from_wrong_city() {
    let d = deployment();
    let nonce = d.nonces.issue("agent-001");
    let elsewhere = GeographicRegion::new("US").with_state("California").with_city("Fresno");
    let body = signed_body(&d, &nonce, &elsewhere);

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::GeolocationPolicyViolation);
    assert_eq!(err.details["dimension"], "city");
    assert_eq!(err.details["received"], "Fresno");
    assert_eq!(err.details["agent"], "agent-001");
    assert!(d.nonces.is_active(&nonce));
}

/// The global allow-list runs before the agent's own policy.
#[test]
fn global_allow_list_rejects_region() {
    let d = deployment();
    let nonce = d.nonces.issue("agent-002");
    let other = KeyPair::generate();
    // agent-002 has no geo policy of its own; rebuild it with a known key
    d.registry
        .replace(vec![AgentEntry::new("agent-002", other.public_key().clone())])
        .unwrap();
    let body = SubmissionBuilder::new("agent-002", &other)
        .region(&GeographicRegion::new("DE"))
        .build(&nonce)
        .unwrap();

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::GeolocationPolicyViolation);
    assert_eq!(err.details["check"], "global_allow_list");
}

/// Device-reported location contradicting the registered one is rejected.
#[test]
fn attack_device_location_contradicts_registration() {
    let d = deployment();
    let nonce = d.nonces.issue("agent-001");
    let body = SubmissionBuilder::new("agent-001", &d.agent)
        .region(&home())
        .device_geolocation(&GeographicRegion::new("US").with_city("Reno"))
        .build(&nonce)
        .unwrap();

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.details["check"], "device_location");
}

// =============================================================================
// Defense in depth
// =============================================================================

/// A gateway checking only the key-hash allowlist passes a forged location;
/// the collector catches it.
#[test]
fn hash_only_gateway_defers_geo_to_collector() {
    let d = deployment();
    let gateway = ValidationPipeline::new(
        PipelineConfig::gateway().with_agent(true),
        d.registry.clone(),
        None,
        GeoPolicyEngine::default(),
    )
    .unwrap();

    let nonce = d.nonces.issue("agent-001");
    let forged = GeographicRegion::new("US").with_state("Nevada");
    let body = signed_body(&d, &nonce, &forged);

    let edge_claims = SubmissionClaims {
        key_hash: Some(d.agent.public_key().key_hash().to_string()),
        geo_claim: Some(forged),
        ..Default::default()
    };
    assert!(gateway.validate(&edge_claims).is_ok());

    let err = d.collector.validate(&claims(&body)).unwrap_err();
    assert_eq!(err.kind, RejectionKind::GeolocationPolicyViolation);
    assert_eq!(err.rejected_by, Layer::Collector);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Many workers race to submit the same valid payload; exactly one wins.
#[test]
fn concurrent_submissions_accept_exactly_once() {
    let d = Arc::new(deployment());
    let nonce = d.nonces.issue("agent-001");
    let body = signed_body(&d, &nonce, &home());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let d = Arc::clone(&d);
            let claims = claims(&body);
            thread::spawn(move || d.collector.validate(&claims))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind == RejectionKind::NonceInvalid));
}
