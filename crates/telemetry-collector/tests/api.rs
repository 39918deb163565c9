//! API Tests for the Telemetry Collector
//!
//! These tests drive the router in-process:
//! - Nonce issuance by agent id, key hash and `Signature-Input` header
//! - Full validation of signed submissions
//! - Replay, theft and forgery attempts at the HTTP level
//! - Allowlist management and nonce diagnostics

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

use telemetry_collector::{
    create_router, AppState, CollectorConfig, LoggingSink, SinkError, TelemetrySink,
};
use telemetry_core::{
    AgentEntry, AgentGeoPolicy, AgentRegistry, GeographicRegion, KeyPair, SignatureInput,
    Submission, SubmissionBuilder, MAX_SUBMISSION_BYTES,
};

// =============================================================================
// Test Helpers
// =============================================================================

struct TestCollector {
    app: Router,
    state: Arc<AppState>,
}

fn austin() -> GeographicRegion {
    GeographicRegion::new("US").with_state("Texas").with_city("Austin")
}

fn collector_with(config: CollectorConfig, registry: AgentRegistry) -> TestCollector {
    collector_with_sink(config, registry, Arc::new(LoggingSink::new()))
}

fn collector_with_sink(
    config: CollectorConfig,
    registry: AgentRegistry,
    sink: Arc<dyn TelemetrySink>,
) -> TestCollector {
    let state = Arc::new(
        AppState::new(config, Arc::new(registry), sink).expect("Failed to build state"),
    );
    TestCollector {
        app: create_router(Arc::clone(&state)),
        state,
    }
}

/// Two agents: `agent-001` pinned to Austin and `agent-002` unrestricted
fn two_agents(alice: &KeyPair, bob: &KeyPair) -> AgentRegistry {
    AgentRegistry::new(vec![
        AgentEntry::new("agent-001", alice.public_key().clone())
            .with_geo_policy(AgentGeoPolicy::Expected(austin()))
            .with_services(["edge-sensor"]),
        AgentEntry::new("agent-002", bob.public_key().clone()),
    ])
    .expect("Failed to build registry")
}

fn collector(alice: &KeyPair, bob: &KeyPair) -> TestCollector {
    collector_with(CollectorConfig::default(), two_agents(alice, bob))
}

/// Sink whose backend is down
#[derive(Debug)]
struct UnavailableSink;

#[async_trait::async_trait]
impl TelemetrySink for UnavailableSink {
    async fn accept(&self, _submission: &Submission) -> Result<String, SinkError> {
        Err(SinkError::Unavailable("queue at 10.0.0.7 refused connection".into()))
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Body is not JSON")
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn fetch_nonce(app: &Router, agent_id: &str) -> String {
    let (status, body) = get(app, &format!("/nonce?agent_id={}", agent_id)).await;
    assert_eq!(status, StatusCode::OK, "nonce request failed: {}", body);
    body["nonce"].as_str().unwrap().to_string()
}

fn sensor_metrics() -> Value {
    json!({"service": {"name": "edge-sensor"}, "cpu_percent": 12.5})
}

fn alice_submission(alice: &KeyPair, nonce: &str) -> Value {
    SubmissionBuilder::new("agent-001", alice)
        .metrics(sensor_metrics())
        .region(&austin())
        .build(nonce)
        .unwrap()
}

fn temp_allowlist(content: &Value) -> PathBuf {
    let path = std::env::temp_dir().join(format!("collector-allowlist-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, content.to_string()).unwrap();
    path
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_counts() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);
    fetch_nonce(&collector.app, "agent-002").await;

    let (status, body) = get(&collector.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "telemetry-collector");
    assert_eq!(body["active_nonces"], 1);
    assert_eq!(body["registered_agents"], 2);
}

// =============================================================================
// Nonce Issuance
// =============================================================================

#[tokio::test]
async fn test_nonce_by_agent_id() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let (status, body) = get(&collector.app, "/nonce?agent_id=agent-001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_id"], "agent-001");
    assert_eq!(body["expires_in"], 300);
    assert_eq!(body["nonce"].as_str().unwrap().len(), 64);
    assert_eq!(body["identity_fingerprint"], alice.public_key().fingerprint());
}

#[tokio::test]
async fn test_nonce_by_key_hash() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let uri = format!("/nonce?public_key_hash={}", bob.public_key().key_hash());
    let (status, body) = get(&collector.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_id"], "agent-002");
}

#[tokio::test]
async fn test_nonce_with_matching_signature_input() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let header = SignatureInput::new(alice.public_key().key_hash()).to_string();
    let request = Request::get("/nonce?agent_id=agent-001")
        .header("Signature-Input", header)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&collector.app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_nonce_with_foreign_signature_input_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    // Bob's key presented for Alice's identity
    let header = SignatureInput::new(bob.public_key().key_hash()).to_string();
    let request = Request::get("/nonce?agent_id=agent-001")
        .header("Signature-Input", header)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&collector.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "agent_verification_failed");
    assert_eq!(collector.state.nonces.active_count(), 0);
}

#[tokio::test]
async fn test_nonce_malformed_signature_input() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let request = Request::get("/nonce?agent_id=agent-001")
        .header("Signature-Input", "sig1=(\"@method\");alg=\"ed25519\"")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&collector.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
}

#[tokio::test]
async fn test_nonce_unknown_agent() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let (status, body) = get(&collector.app, "/nonce?agent_id=agent-999").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "agent_not_found");
    assert_eq!(body["rejected_by"], "collector");
    assert_eq!(body["validation_type"], "agent_verification");
}

#[tokio::test]
async fn test_nonce_without_identity() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let (status, body) = get(&collector.app, "/nonce").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
}

#[tokio::test]
async fn test_duplicate_identity_query_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let (status, body) =
        get(&collector.app, "/nonce?agent_id=agent-001&agent_id=agent-002").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
    assert_eq!(body["rejected_by"], "collector");
    assert_eq!(body["validation_type"], "structural_validation");
    assert_eq!(collector.state.nonces.active_count(), 0);
}

#[tokio::test]
async fn test_second_nonce_replaces_first() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let first = fetch_nonce(&collector.app, "agent-001").await;
    let second = fetch_nonce(&collector.app, "agent-001").await;
    assert_ne!(first, second);

    let (status, body) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &first)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "nonce_invalid");

    let (status, _) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &second)).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Submissions
// =============================================================================

#[tokio::test]
async fn test_valid_submission_accepted() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let (status, body) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &nonce)).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["agent_id"], "agent-001");
    assert_eq!(body["collector_id"], "telemetry-collector");
    assert!(!body["processing_id"].as_str().unwrap().is_empty());
    assert!(!collector.state.nonces.is_active(&nonce));
}

#[tokio::test]
async fn test_replay_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let submission = alice_submission(&alice, &nonce);

    let (status, _) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "nonce_invalid");
    assert_eq!(body["validation_type"], "nonce_validation");
}

#[tokio::test]
async fn test_tampered_metrics_rejected_and_nonce_survives() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let mut submission = alice_submission(&alice, &nonce);
    submission["metrics"]["cpu_percent"] = json!(99.9);

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "signature_invalid");
    assert!(collector.state.nonces.is_active(&nonce));

    // The honest retry still succeeds
    let (status, _) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &nonce)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stolen_nonce_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let alice_nonce = fetch_nonce(&collector.app, "agent-001").await;
    let submission = SubmissionBuilder::new("agent-002", &bob)
        .metrics(json!({"cpu_percent": 1.0}))
        .region(&GeographicRegion::new("US"))
        .build(&alice_nonce)
        .unwrap();

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "nonce_invalid");
    assert!(collector.state.nonces.is_active(&alice_nonce));
}

#[tokio::test]
async fn test_wrong_city_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let submission = SubmissionBuilder::new("agent-001", &alice)
        .metrics(sensor_metrics())
        .region(&GeographicRegion::new("US").with_state("Texas").with_city("Dallas"))
        .build(&nonce)
        .unwrap();

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "geolocation_policy_violation");
    assert_eq!(body["details"]["dimension"], "city");
    assert!(collector.state.nonces.is_active(&nonce));
}

#[tokio::test]
async fn test_service_outside_scope_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let submission = SubmissionBuilder::new("agent-001", &alice)
        .metrics(json!({"service": {"name": "billing"}}))
        .region(&austin())
        .build(&nonce)
        .unwrap();

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "agent_verification_failed");
}

#[tokio::test]
async fn test_missing_field_names_field() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let mut submission = alice_submission(&alice, &nonce);
    submission.as_object_mut().unwrap().remove("signature");

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
    assert_eq!(body["details"]["field"], "signature");
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let request = Request::post("/metrics")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&collector.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
}

#[tokio::test]
async fn test_oversized_body_rejected_as_structural() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let padding = "x".repeat(3 * 1024 * 1024);
    let request = Request::post("/metrics")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "padding": padding }).to_string()))
        .unwrap();
    let (status, body) = send(&collector.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "structural_error");
    assert_eq!(body["rejected_by"], "collector");
    assert_eq!(body["validation_type"], "structural_validation");
    assert!(body["error"].as_str().unwrap().contains(&MAX_SUBMISSION_BYTES.to_string()));
}

#[tokio::test]
async fn test_sink_failure_returns_generic_body() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector_with_sink(
        CollectorConfig::default(),
        two_agents(&alice, &bob),
        Arc::new(UnavailableSink),
    );

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let (status, body) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &nonce)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert_eq!(body["rejected_by"], "collector");
    assert_eq!(body["validation_type"], "internal");
    assert!(body["details"].is_null());
    assert!(body["timestamp"].is_string());
    assert!(!body.to_string().contains("10.0.0.7"));
}

#[tokio::test]
async fn test_region_sent_with_country_accepted() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let submission = SubmissionBuilder::new("agent-001", &alice)
        .metrics(sensor_metrics())
        .region_value(json!({
            "region": "US",
            "country": "US",
            "state": "Texas",
            "city": "Austin"
        }))
        .build(&nonce)
        .unwrap();

    let (status, body) = post_json(&collector.app, "/metrics", &submission).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_global_allow_list_applies() {
    let alice = KeyPair::generate();
    let registry =
        AgentRegistry::new(vec![AgentEntry::new("agent-001", alice.public_key().clone())]).unwrap();
    let config = CollectorConfig {
        allowed_geo: telemetry_core::AllowListPolicy::new(Some(vec!["CA".into()]), None, None),
        ..CollectorConfig::default()
    };
    let collector = collector_with(config, registry);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    let (status, body) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &nonce)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "geolocation_policy_violation");
    assert_eq!(body["details"]["dimension"], "region");
}

// =============================================================================
// Allowlist Management
// =============================================================================

#[tokio::test]
async fn test_list_and_get_agents() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let (status, body) = get(&collector.app, "/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed_agents"], json!(["agent-001", "agent-002"]));
    assert_eq!(body["count"], 2);

    let (status, body) = get(&collector.app, "/agents/agent-001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["public_key_hash"], alice.public_key().key_hash());
    assert_eq!(body["allowed_services"], json!(["edge-sensor"]));

    let (status, body) = get(&collector.app, "/agents/agent-404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["rejected_by"], "collector");
    assert_eq!(body["validation_type"], "lookup");
}

#[tokio::test]
async fn test_reload_swaps_allowlist() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let path = temp_allowlist(&json!([
        {"agent_id": "agent-001", "public_key": alice.public_key().to_base64()}
    ]));
    let registry = AgentRegistry::from_file(&path).unwrap();
    let collector = collector_with(CollectorConfig::default(), registry);

    let (status, _) = get(&collector.app, "/nonce?agent_id=agent-002").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    std::fs::write(
        &path,
        json!([
            {"agent_id": "agent-001", "public_key": alice.public_key().to_base64()},
            {"agent_id": "agent-002", "public_key": bob.public_key().to_base64()}
        ])
        .to_string(),
    )
    .unwrap();

    let (status, body) = post_json(&collector.app, "/agents/reload", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_count"], 2);

    let (status, _) = get(&collector.app, "/nonce?agent_id=agent-002").await;
    assert_eq!(status, StatusCode::OK);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_allowlist() {
    let alice = KeyPair::generate();
    let path = temp_allowlist(&json!([
        {"agent_id": "agent-001", "public_key": alice.public_key().to_base64()}
    ]));
    let registry = AgentRegistry::from_file(&path).unwrap();
    let collector = collector_with(CollectorConfig::default(), registry);

    std::fs::write(&path, "[{\"agent_id\": ").unwrap();

    let (status, body) = post_json(&collector.app, "/agents/reload", &json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "RELOAD_FAILED");

    let (status, _) = get(&collector.app, "/nonce?agent_id=agent-001").await;
    assert_eq!(status, StatusCode::OK);

    std::fs::remove_file(&path).ok();
}

// =============================================================================
// Nonce Diagnostics
// =============================================================================

#[tokio::test]
async fn test_nonce_stats_and_cleanup() {
    let (alice, bob) = (KeyPair::generate(), KeyPair::generate());
    let collector = collector(&alice, &bob);

    let nonce = fetch_nonce(&collector.app, "agent-001").await;
    fetch_nonce(&collector.app, "agent-002").await;
    let (status, _) =
        post_json(&collector.app, "/metrics", &alice_submission(&alice, &nonce)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&collector.app, "/nonces/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["nonce_statistics"];
    assert_eq!(stats["total_active_nonces"], 1);
    assert_eq!(stats["consumed_awaiting_sweep"], 1);
    assert_eq!(stats["total_issued"], 2);
    assert_eq!(stats["agent_nonce_counts"]["agent-002"], 1);

    let (status, body) = post_json(&collector.app, "/nonces/cleanup", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleaned_count"], 1);
    assert_eq!(body["remaining_count"], 1);
}
