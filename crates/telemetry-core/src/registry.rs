//! Agent registry
//!
//! Maps agent identity to its registered public key, geographic policy and
//! permitted service scopes. Entries are looked up by agent id or by the hash
//! of the public key.
//!
//! The whole table sits behind one `Arc` and is swapped atomically on reload,
//! so a request always sees either the old table or the new one. A reload that
//! fails to parse leaves the current table untouched.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::PublicKey;
use crate::error::{CoreError, Result};
use crate::geo::{AgentGeoPolicy, AllowListPolicy};
use crate::types::GeographicRegion;

/// Allowlist file record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(alias = "agent_name")]
    pub agent_id: String,
    /// Base64 Ed25519 public key
    pub public_key: String,
    #[serde(default, alias = "geolocation", skip_serializing_if = "Option::is_none")]
    pub expected_geolocation: Option<GeographicRegion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_regions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_cities: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_services: Vec<String>,
}

/// A registered agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEntry {
    pub agent_id: String,
    pub public_key: PublicKey,
    pub geo_policy: AgentGeoPolicy,
    /// Empty means any service
    pub allowed_services: Vec<String>,
}

/// Public view of an entry
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub public_key: String,
    pub public_key_hash: String,
    pub key_fingerprint: String,
    pub geo_policy: serde_json::Value,
    pub allowed_services: Vec<String>,
}

impl AgentEntry {
    pub fn new(agent_id: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            agent_id: agent_id.into(),
            public_key,
            geo_policy: AgentGeoPolicy::Unrestricted,
            allowed_services: Vec::new(),
        }
    }

    pub fn with_geo_policy(mut self, policy: AgentGeoPolicy) -> Self {
        self.geo_policy = policy;
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_hash(&self) -> &str {
        self.public_key.key_hash()
    }

    /// True when `service` is within this agent's scope
    pub fn allows_service(&self, service: &str) -> bool {
        self.allowed_services.is_empty() || self.allowed_services.iter().any(|s| s == service)
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            agent_id: self.agent_id.clone(),
            public_key: self.public_key.to_base64(),
            public_key_hash: self.key_hash().to_string(),
            key_fingerprint: self.public_key.fingerprint(),
            geo_policy: self.geo_policy.to_value(),
            allowed_services: self.allowed_services.clone(),
        }
    }

    fn from_record(index: usize, record: AgentRecord) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidAgentEntry { index, reason };

        let agent_id = record.agent_id.trim().to_string();
        if agent_id.is_empty() {
            return Err(invalid("agent_id is empty".into()));
        }

        let public_key = PublicKey::from_base64(&record.public_key)
            .map_err(|e| invalid(format!("agent '{}': {}", agent_id, e)))?;

        let allow_list = AllowListPolicy::new(
            record.allowed_regions,
            record.allowed_states,
            record.allowed_cities,
        );
        let expected = record
            .expected_geolocation
            .map(GeographicRegion::normalized)
            .filter(|g| !g.is_empty());

        let geo_policy = match (expected, allow_list.is_unrestricted()) {
            (Some(_), false) => {
                return Err(invalid(format!(
                    "agent '{}': expected_geolocation and allowed_* lists are mutually exclusive",
                    agent_id
                )))
            }
            (Some(location), true) => AgentGeoPolicy::Expected(location),
            (None, false) => AgentGeoPolicy::AllowList(allow_list),
            (None, true) => AgentGeoPolicy::Unrestricted,
        };

        Ok(Self {
            agent_id,
            public_key,
            geo_policy,
            allowed_services: record.allowed_services,
        })
    }
}

#[derive(Debug, Default)]
struct AgentTable {
    by_id: HashMap<String, Arc<AgentEntry>>,
    by_key_hash: HashMap<String, Arc<AgentEntry>>,
}

impl AgentTable {
    fn build(entries: Vec<AgentEntry>) -> Result<Self> {
        let mut table = AgentTable::default();
        for entry in entries {
            let entry = Arc::new(entry);
            if table.by_id.contains_key(&entry.agent_id) {
                return Err(CoreError::InvalidAllowlist(format!(
                    "duplicate agent_id '{}'",
                    entry.agent_id
                )));
            }
            if table.by_key_hash.contains_key(entry.key_hash()) {
                return Err(CoreError::InvalidAllowlist(format!(
                    "agent '{}' reuses a key already registered",
                    entry.agent_id
                )));
            }
            table.by_key_hash.insert(entry.key_hash().to_string(), Arc::clone(&entry));
            table.by_id.insert(entry.agent_id.clone(), entry);
        }
        Ok(table)
    }
}

/// Parse allowlist JSON into entries
pub fn parse_allowlist(json: &str) -> Result<Vec<AgentEntry>> {
    let records: Vec<AgentRecord> = serde_json::from_str(json)
        .map_err(|e| CoreError::InvalidAllowlist(e.to_string()))?;
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| AgentEntry::from_record(i, r))
        .collect()
}

/// Reloadable table of registered agents
pub struct AgentRegistry {
    source: Option<PathBuf>,
    table: RwLock<Arc<AgentTable>>,
}

impl AgentRegistry {
    /// Registry over a fixed set of entries
    pub fn new(entries: Vec<AgentEntry>) -> Result<Self> {
        Ok(Self {
            source: None,
            table: RwLock::new(Arc::new(AgentTable::build(entries)?)),
        })
    }

    /// Registry backed by an allowlist file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = AgentTable::build(Self::read(&path)?)?;
        info!(path = %path.display(), agents = table.by_id.len(), "Loaded agent allowlist");
        Ok(Self {
            source: Some(path),
            table: RwLock::new(Arc::new(table)),
        })
    }

    fn read(path: &Path) -> Result<Vec<AgentEntry>> {
        let content = fs::read_to_string(path).map_err(|e| CoreError::AllowlistIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        parse_allowlist(&content)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Atomically replace the table with `entries`
    pub fn replace(&self, entries: Vec<AgentEntry>) -> Result<usize> {
        let table = AgentTable::build(entries)?;
        let count = table.by_id.len();
        *self.table.write() = Arc::new(table);
        Ok(count)
    }

    /// Re-read the backing file and swap it in
    pub fn reload(&self) -> Result<usize> {
        let Some(path) = &self.source else {
            return Err(CoreError::InvalidConfig(
                "agent registry has no backing allowlist file".into(),
            ));
        };

        match Self::read(path).and_then(|entries| self.replace(entries)) {
            Ok(count) => {
                info!(path = %path.display(), agents = count, "Reloaded agent allowlist");
                Ok(count)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Allowlist reload failed, keeping previous table");
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> Arc<AgentTable> {
        self.table.read().clone()
    }

    pub fn lookup_by_id(&self, agent_id: &str) -> Option<Arc<AgentEntry>> {
        self.snapshot().by_id.get(agent_id).cloned()
    }

    /// Look up by key hash; hex case is ignored
    pub fn lookup_by_key_hash(&self, key_hash: &str) -> Option<Arc<AgentEntry>> {
        let normalized = key_hash.trim().to_ascii_lowercase();
        self.snapshot().by_key_hash.get(&normalized).cloned()
    }

    /// Registered agent ids, sorted
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshot().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
