//! Submission data model
//!
//! A [`Submission`] is the parsed JSON body an agent posts. Parsing performs
//! the structural stage: every missing or mistyped field becomes a
//! [`Rejection`] naming that field. [`SubmissionClaims`] is the transport
//! neutral view the validation pipeline consumes, built either from a parsed
//! body or from request headers alone.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canonical::{CanonicalSigner, SignableFields};
use crate::crypto::{KeyPair, SignatureAlgorithm};
use crate::error::Result;
use crate::validation::{Layer, Rejection, StageResult};

/// Largest submission body either layer will buffer
pub const MAX_SUBMISSION_BYTES: usize = 1024 * 1024;

/// A claimed or registered geographic location
///
/// Every dimension is optional. `country` is accepted in place of `region`,
/// and both may be sent as long as they name the same place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegionFields")]
pub struct GeographicRegion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Deserialize)]
struct RegionFields {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

impl TryFrom<RegionFields> for GeographicRegion {
    type Error = String;

    fn try_from(fields: RegionFields) -> std::result::Result<Self, Self::Error> {
        let region = match (fields.region, fields.country) {
            (Some(region), Some(country))
                if !region.trim().eq_ignore_ascii_case(country.trim()) =>
            {
                return Err(format!(
                    "region '{}' and country '{}' disagree",
                    region, country
                ));
            }
            (Some(region), _) => Some(region),
            (None, country) => country,
        };
        Ok(Self {
            region,
            state: fields.state,
            city: fields.city,
        })
    }
}

impl GeographicRegion {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// True when no dimension is set
    pub fn is_empty(&self) -> bool {
        self.region.is_none() && self.state.is_none() && self.city.is_none()
    }

    /// Drop blank dimensions so they count as missing
    pub fn normalized(mut self) -> Self {
        for dim in [&mut self.region, &mut self.state, &mut self.city] {
            if dim.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *dim = None;
            }
        }
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Signable fields plus the signature claimed over them
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPayload {
    pub fields: SignableFields,
    pub signature: String,
    pub algorithm: String,
}

/// Everything the validation pipeline may inspect about one submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionClaims {
    /// Agent identifier claimed in the body
    pub agent_id: Option<String>,
    /// Public key hash claimed in a header or the body
    pub key_hash: Option<String>,
    pub nonce: Option<String>,
    /// Present only when the body was parsed
    pub signed: Option<SignedPayload>,
    /// Claimed `geographic_region`
    pub geo_claim: Option<GeographicRegion>,
    /// Device-reported location, if any
    pub device_geolocation: Option<GeographicRegion>,
    /// Service scope (`metrics.service.name`)
    pub service: Option<String>,
}

/// A structurally valid submission body
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub agent_id: String,
    pub public_key_hash: Option<String>,
    pub signable: SignableFields,
    pub geographic_region: GeographicRegion,
    pub geolocation: Option<GeographicRegion>,
    pub nonce: String,
    pub signature: String,
    pub algorithm: String,
    pub timestamp: String,
}

fn required_str(body: &Map<String, Value>, layer: Layer, names: &[&str]) -> StageResult<String> {
    match names.iter().find_map(|n| body.get(*n)) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(Rejection::missing_field(layer, names[0], "non-empty string")),
    }
}

fn optional_str(body: &Map<String, Value>, layer: Layer, names: &[&str]) -> StageResult<Option<String>> {
    match names.iter().find_map(|n| body.get(*n)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Rejection::missing_field(layer, names[0], "string")),
    }
}

fn required_object<'a>(body: &'a Map<String, Value>, layer: Layer, name: &str) -> StageResult<&'a Value> {
    match body.get(name) {
        Some(v @ Value::Object(_)) => Ok(v),
        _ => Err(Rejection::missing_field(layer, name, "object")),
    }
}

fn parse_region(value: &Value, layer: Layer, name: &str) -> StageResult<GeographicRegion> {
    serde_json::from_value::<GeographicRegion>(value.clone())
        .map(GeographicRegion::normalized)
        .map_err(|_| Rejection::missing_field(layer, name, "object with string region/state/city"))
}

impl Submission {
    /// Parse raw body bytes
    pub fn from_slice(bytes: &[u8], layer: Layer) -> StageResult<Self> {
        let body: Value = serde_json::from_slice(bytes)
            .map_err(|e| Rejection::structural(layer, format!("Body is not valid JSON: {}", e)))?;
        Self::from_json(&body, layer)
    }

    /// Structural validation of a decoded body
    pub fn from_json(body: &Value, layer: Layer) -> StageResult<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| Rejection::structural(layer, "Body must be a JSON object"))?;

        let agent_id = required_str(body, layer, &["agent_id", "agent_name"])?;
        let metrics = required_object(body, layer, "metrics")?;
        let region_value = required_object(body, layer, "geographic_region")?;
        let geographic_region = parse_region(region_value, layer, "geographic_region")?;
        let nonce = required_str(body, layer, &["nonce"])?;
        let signature = required_str(body, layer, &["signature"])?;
        let algorithm = required_str(body, layer, &["algorithm"])?;
        let timestamp = required_str(body, layer, &["timestamp"])?;
        let public_key_hash =
            optional_str(body, layer, &["public_key_hash", "tpm_public_key_hash"])?;

        let geolocation = match body.get("geolocation") {
            None | Some(Value::Null) => None,
            Some(v @ Value::Object(_)) => Some(parse_region(v, layer, "geolocation")?),
            Some(_) => return Err(Rejection::missing_field(layer, "geolocation", "object")),
        };

        Ok(Self {
            agent_id,
            public_key_hash,
            signable: SignableFields::new(metrics.clone(), region_value.clone()),
            geographic_region,
            geolocation,
            nonce,
            signature,
            algorithm,
            timestamp,
        })
    }

    /// Service scope named in `metrics.service.name`
    pub fn service_name(&self) -> Option<&str> {
        self.signable
            .metrics
            .get("service")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
    }

    /// Pipeline view of this submission
    pub fn claims(&self) -> SubmissionClaims {
        SubmissionClaims {
            agent_id: Some(self.agent_id.clone()),
            key_hash: self.public_key_hash.clone(),
            nonce: Some(self.nonce.clone()),
            signed: Some(SignedPayload {
                fields: self.signable.clone(),
                signature: self.signature.clone(),
                algorithm: self.algorithm.clone(),
            }),
            geo_claim: Some(self.geographic_region.clone()),
            device_geolocation: self.geolocation.clone(),
            service: self.service_name().map(str::to_string),
        }
    }
}

/// Builds signed submission bodies the way an agent does
pub struct SubmissionBuilder<'a> {
    agent_id: String,
    key_pair: &'a KeyPair,
    metrics: Value,
    geographic_region: Value,
    geolocation: Option<Value>,
    algorithm: SignatureAlgorithm,
    include_key_hash: bool,
}

impl<'a> SubmissionBuilder<'a> {
    pub fn new(agent_id: impl Into<String>, key_pair: &'a KeyPair) -> Self {
        Self {
            agent_id: agent_id.into(),
            key_pair,
            metrics: json!({}),
            geographic_region: json!({}),
            geolocation: None,
            algorithm: SignatureAlgorithm::default(),
            include_key_hash: true,
        }
    }

    pub fn metrics(mut self, metrics: Value) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn region(mut self, region: &GeographicRegion) -> Self {
        self.geographic_region = region.to_value();
        self
    }

    /// Raw `geographic_region` object, including any extra keys
    pub fn region_value(mut self, region: Value) -> Self {
        self.geographic_region = region;
        self
    }

    pub fn device_geolocation(mut self, location: &GeographicRegion) -> Self {
        self.geolocation = Some(location.to_value());
        self
    }

    pub fn algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn without_key_hash(mut self) -> Self {
        self.include_key_hash = false;
        self
    }

    /// Sign over `nonce` and produce the JSON body
    pub fn build(&self, nonce: &str) -> Result<Value> {
        let fields = SignableFields::new(self.metrics.clone(), self.geographic_region.clone());
        let signature = CanonicalSigner::new(self.key_pair)
            .with_algorithm(self.algorithm)
            .sign(&fields, nonce)?;

        let mut body = json!({
            "agent_id": self.agent_id,
            "metrics": self.metrics,
            "geographic_region": self.geographic_region,
            "nonce": nonce,
            "signature": signature,
            "algorithm": self.algorithm.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if self.include_key_hash {
            body["public_key_hash"] = json!(self.key_pair.public_key().key_hash());
        }
        if let Some(location) = &self.geolocation {
            body["geolocation"] = location.clone();
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::RejectionKind;

    fn valid_body() -> Value {
        json!({
            "agent_id": "agent-001",
            "metrics": {"service": {"name": "edge-sensor"}, "cpu": 0.5},
            "geographic_region": {"region": "US", "state": "Texas"},
            "nonce": "abc",
            "signature": "00",
            "algorithm": "sha256",
            "timestamp": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_parse_valid_body() {
        let s = Submission::from_json(&valid_body(), Layer::Collector).unwrap();
        assert_eq!(s.agent_id, "agent-001");
        assert_eq!(s.geographic_region.region.as_deref(), Some("US"));
        assert_eq!(s.service_name(), Some("edge-sensor"));
        assert!(s.geolocation.is_none());
    }

    #[test]
    fn test_each_required_field_is_named() {
        for field in [
            "agent_id",
            "metrics",
            "geographic_region",
            "nonce",
            "signature",
            "algorithm",
            "timestamp",
        ] {
            let mut body = valid_body();
            body.as_object_mut().unwrap().remove(field);
            let r = Submission::from_json(&body, Layer::Collector).unwrap_err();
            assert_eq!(r.kind, RejectionKind::StructuralError);
            assert_eq!(r.details["field"], field);
        }
    }

    #[test]
    fn test_mistyped_fields_rejected() {
        let mut body = valid_body();
        body["metrics"] = json!("not an object");
        assert!(Submission::from_json(&body, Layer::Collector).is_err());

        let mut body = valid_body();
        body["nonce"] = json!(42);
        assert!(Submission::from_json(&body, Layer::Collector).is_err());

        let mut body = valid_body();
        body["nonce"] = json!("");
        assert!(Submission::from_json(&body, Layer::Collector).is_err());

        let mut body = valid_body();
        body["geographic_region"] = json!({"region": 5});
        assert!(Submission::from_json(&body, Layer::Collector).is_err());
    }

    #[test]
    fn test_aliases_accepted() {
        let mut body = valid_body();
        let map = body.as_object_mut().unwrap();
        let id = map.remove("agent_id").unwrap();
        map.insert("agent_name".into(), id);
        map.insert("tpm_public_key_hash".into(), json!("ff"));
        map.insert("geographic_region".into(), json!({"country": "DE"}));

        let s = Submission::from_json(&body, Layer::Collector).unwrap();
        assert_eq!(s.agent_id, "agent-001");
        assert_eq!(s.public_key_hash.as_deref(), Some("ff"));
        assert_eq!(s.geographic_region.region.as_deref(), Some("DE"));
    }

    #[test]
    fn test_region_and_country_together() {
        let mut body = valid_body();
        body["geographic_region"] = json!({"region": "US", "country": "us", "state": "Texas"});
        let s = Submission::from_json(&body, Layer::Collector).unwrap();
        assert_eq!(s.geographic_region.region.as_deref(), Some("US"));
        assert_eq!(s.geographic_region.state.as_deref(), Some("Texas"));

        body["geographic_region"] = json!({"region": "US", "country": "DE"});
        let r = Submission::from_json(&body, Layer::Collector).unwrap_err();
        assert_eq!(r.kind, RejectionKind::StructuralError);
    }

    #[test]
    fn test_non_object_body() {
        let r = Submission::from_slice(b"[1,2]", Layer::Gateway).unwrap_err();
        assert_eq!(r.rejected_by, Layer::Gateway);
        assert!(Submission::from_slice(b"{not json", Layer::Gateway).is_err());
    }

    #[test]
    fn test_blank_dimensions_are_missing() {
        let region: GeographicRegion =
            serde_json::from_value(json!({"region": "US", "city": " "})).unwrap();
        assert_eq!(region.normalized().city, None);
    }

    #[test]
    fn test_builder_output_parses() {
        let kp = KeyPair::generate();
        let body = SubmissionBuilder::new("agent-001", &kp)
            .metrics(json!({"cpu": 1}))
            .region(&GeographicRegion::new("US").with_state("Texas"))
            .device_geolocation(&GeographicRegion::new("US"))
            .build("nonce-1")
            .unwrap();

        let s = Submission::from_json(&body, Layer::Collector).unwrap();
        assert_eq!(s.nonce, "nonce-1");
        assert_eq!(s.public_key_hash.as_deref(), Some(kp.public_key().key_hash()));
        assert_eq!(s.geolocation, Some(GeographicRegion::new("US")));
        assert_eq!(s.claims().signed.unwrap().signature.len(), 128);
    }
}
