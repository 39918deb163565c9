//! Geographic policy evaluation
//!
//! Two pure policy modes over a claimed [`GeographicRegion`]:
//!
//! - **Allow-list**: each configured dimension lists the accepted values.
//!   Unset dimensions are not checked. A configured `region` requires the
//!   claim to carry a region; `state` and `city` are checked only when claimed.
//! - **Exact match**: the claim is compared case-insensitively against one
//!   expected location. A dimension missing on either side is skipped.
//!
//! Failures carry a [`GeoMismatch`] with the expected and received values.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::types::GeographicRegion;

/// One dimension of a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoDimension {
    Region,
    State,
    City,
}

impl GeoDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoDimension::Region => "region",
            GeoDimension::State => "state",
            GeoDimension::City => "city",
        }
    }

    fn of(self, location: &GeographicRegion) -> Option<&str> {
        match self {
            GeoDimension::Region => location.region.as_deref(),
            GeoDimension::State => location.state.as_deref(),
            GeoDimension::City => location.city.as_deref(),
        }
    }

    const ALL: [GeoDimension; 3] = [GeoDimension::Region, GeoDimension::State, GeoDimension::City];
}

impl fmt::Display for GeoDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which check produced a mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoCheck {
    GlobalAllowList,
    AgentAllowList,
    ExpectedLocation,
    DeviceLocation,
}

/// A claimed location that failed policy
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMismatch {
    pub check: GeoCheck,
    pub dimension: GeoDimension,
    /// Expected value, or the allowed set
    pub expected: Value,
    pub received: Option<String>,
    pub agent: Option<String>,
}

impl GeoMismatch {
    fn with_agent(mut self, agent: Option<&str>) -> Self {
        self.agent = agent.map(str::to_string);
        self
    }

    pub fn details(&self) -> Value {
        json!({
            "check": self.check,
            "dimension": self.dimension,
            "expected": self.expected,
            "received": self.received,
            "agent": self.agent,
        })
    }
}

impl fmt::Display for GeoMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.received {
            Some(received) => write!(
                f,
                "{} '{}' not permitted (expected {})",
                self.dimension, received, self.expected
            ),
            None => write!(f, "{} missing (expected {})", self.dimension, self.expected),
        }
    }
}

/// Accepted values per dimension; `None` leaves a dimension unchecked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cities: Option<Vec<String>>,
}

fn non_empty(values: Option<Vec<String>>) -> Option<Vec<String>> {
    values.filter(|v| !v.is_empty())
}

impl AllowListPolicy {
    /// Build a policy; empty lists count as unset
    pub fn new(
        regions: Option<Vec<String>>,
        states: Option<Vec<String>>,
        cities: Option<Vec<String>>,
    ) -> Self {
        Self {
            regions: non_empty(regions),
            states: non_empty(states),
            cities: non_empty(cities),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.regions.is_none() && self.states.is_none() && self.cities.is_none()
    }

    fn allowed(&self, dimension: GeoDimension) -> Option<&Vec<String>> {
        match dimension {
            GeoDimension::Region => self.regions.as_ref(),
            GeoDimension::State => self.states.as_ref(),
            GeoDimension::City => self.cities.as_ref(),
        }
    }

    fn evaluate(&self, claim: &GeographicRegion, check: GeoCheck) -> Result<(), GeoMismatch> {
        for dimension in GeoDimension::ALL {
            let Some(allowed) = self.allowed(dimension) else {
                continue;
            };
            let received = dimension.of(claim);
            let ok = match received {
                Some(value) => allowed.iter().any(|a| a.eq_ignore_ascii_case(value)),
                None => dimension != GeoDimension::Region,
            };
            if !ok {
                return Err(GeoMismatch {
                    check,
                    dimension,
                    expected: json!(allowed),
                    received: received.map(str::to_string),
                    agent: None,
                });
            }
        }
        Ok(())
    }

    pub fn check(&self, claim: &GeographicRegion) -> Result<(), GeoMismatch> {
        self.evaluate(claim, GeoCheck::GlobalAllowList)
    }
}

fn exact_match(
    claim: &GeographicRegion,
    expected: &GeographicRegion,
    check: GeoCheck,
) -> Result<(), GeoMismatch> {
    for dimension in GeoDimension::ALL {
        if let (Some(received), Some(want)) = (dimension.of(claim), dimension.of(expected)) {
            if !received.trim().eq_ignore_ascii_case(want.trim()) {
                return Err(GeoMismatch {
                    check,
                    dimension,
                    expected: json!(want),
                    received: Some(received.to_string()),
                    agent: None,
                });
            }
        }
    }
    Ok(())
}

/// Compare a claim against one expected location
pub fn check_exact(claim: &GeographicRegion, expected: &GeographicRegion) -> Result<(), GeoMismatch> {
    exact_match(claim, expected, GeoCheck::ExpectedLocation)
}

/// Geographic policy registered for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AgentGeoPolicy {
    #[default]
    Unrestricted,
    Expected(GeographicRegion),
    AllowList(AllowListPolicy),
}

impl AgentGeoPolicy {
    pub fn expected(&self) -> Option<&GeographicRegion> {
        match self {
            AgentGeoPolicy::Expected(location) => Some(location),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            AgentGeoPolicy::Unrestricted => json!({"mode": "unrestricted"}),
            AgentGeoPolicy::Expected(location) => {
                json!({"mode": "expected", "expected_geolocation": location})
            }
            AgentGeoPolicy::AllowList(policy) => json!({"mode": "allow_list", "allowed": policy}),
        }
    }
}

/// Evaluates claims against a global allow-list and per-agent policy
#[derive(Debug, Clone, Default)]
pub struct GeoPolicyEngine {
    global: Option<AllowListPolicy>,
}

impl GeoPolicyEngine {
    pub fn new(global: Option<AllowListPolicy>) -> Self {
        Self {
            global: global.filter(|p| !p.is_unrestricted()),
        }
    }

    pub fn global_policy(&self) -> Option<&AllowListPolicy> {
        self.global.as_ref()
    }

    /// Run every applicable check in order, stopping at the first mismatch
    ///
    /// Order: global allow-list, the agent's own policy, then the
    /// device-reported location against the agent's expected location.
    pub fn evaluate(
        &self,
        claim: &GeographicRegion,
        agent_id: Option<&str>,
        policy: &AgentGeoPolicy,
        device: Option<&GeographicRegion>,
    ) -> Result<(), GeoMismatch> {
        if let Some(global) = &self.global {
            global
                .evaluate(claim, GeoCheck::GlobalAllowList)
                .map_err(|m| m.with_agent(agent_id))?;
        }

        match policy {
            AgentGeoPolicy::Unrestricted => {}
            AgentGeoPolicy::Expected(expected) => {
                exact_match(claim, expected, GeoCheck::ExpectedLocation)
                    .map_err(|m| m.with_agent(agent_id))?;
            }
            AgentGeoPolicy::AllowList(allowed) => {
                allowed
                    .evaluate(claim, GeoCheck::AgentAllowList)
                    .map_err(|m| m.with_agent(agent_id))?;
            }
        }

        if let (Some(device), Some(expected)) = (device, policy.expected()) {
            exact_match(device, expected, GeoCheck::DeviceLocation)
                .map_err(|m| m.with_agent(agent_id))?;
        }
        Ok(())
    }
}
