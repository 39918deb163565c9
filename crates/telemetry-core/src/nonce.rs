//! Nonce issuance and lifecycle
//!
//! A nonce is a random single-use token bound to the agent that requested it.
//! The store keeps at most one outstanding nonce per agent: issuing again
//! replaces the previous one.
//!
//! Records live in a [`ShardedMap`] keyed by nonce value, and a second sharded
//! index maps each owner to its current nonce. Lock order is owner shard
//! before nonce shard; no code path takes them the other way round while
//! holding both.
//!
//! Consumed records stay behind as tombstones until the next [`NonceStore::sweep`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::crypto::fingerprint;
use crate::shard::ShardedMap;

/// Default nonce lifetime in seconds
pub const DEFAULT_NONCE_TTL_SECS: i64 = 300;

/// Default number of random bytes per nonce
pub const DEFAULT_NONCE_LENGTH: usize = 32;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Nonce store settings
#[derive(Debug, Clone, Copy)]
pub struct NonceConfig {
    pub ttl: Duration,
    /// Random bytes per nonce; the token is their hex encoding
    pub length: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_NONCE_TTL_SECS),
            length: DEFAULT_NONCE_LENGTH,
        }
    }
}

#[derive(Debug, Clone)]
struct NonceRecord {
    owner: String,
    issued_at: DateTime<Utc>,
    consumed: bool,
}

impl NonceRecord {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at > ttl
    }
}

/// Diagnostic counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NonceStats {
    pub total_active_nonces: usize,
    pub consumed_awaiting_sweep: usize,
    pub total_issued: u64,
    pub agent_nonce_counts: BTreeMap<String, usize>,
    pub total_agents_with_nonces: usize,
}

/// Process-local store of outstanding nonces
pub struct NonceStore {
    config: NonceConfig,
    clock: Arc<dyn Clock>,
    nonces: ShardedMap<String, NonceRecord>,
    owners: ShardedMap<String, String>,
    total_issued: AtomicU64,
}

impl NonceStore {
    pub fn new(config: NonceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: NonceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: NonceConfig {
                ttl: config.ttl,
                length: config.length.max(1),
            },
            clock,
            nonces: ShardedMap::new(),
            owners: ShardedMap::new(),
            total_issued: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn generate(&self) -> String {
        let mut bytes = vec![0u8; self.config.length];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Issue a fresh nonce for `owner`, replacing any outstanding one
    pub fn issue(&self, owner: &str) -> String {
        let nonce = self.generate();
        let record = NonceRecord {
            owner: owner.to_string(),
            issued_at: self.clock.now(),
            consumed: false,
        };

        let replaced = self.owners.with_shard(owner, |index| {
            let previous = index.insert(owner.to_string(), nonce.clone());
            if let Some(prev) = &previous {
                self.nonces.with_shard(prev.as_str(), |records| records.remove(prev));
            }
            self.nonces
                .with_shard(nonce.as_str(), |records| records.insert(nonce.clone(), record));
            previous
        });

        self.total_issued.fetch_add(1, Ordering::Relaxed);
        debug!(
            owner = %owner,
            nonce = %fingerprint(&nonce),
            replaced = replaced.is_some(),
            "Issued nonce"
        );
        nonce
    }

    /// Check a record, evicting it if expired
    fn check(&self, nonce: &str, owner: Option<&str>) -> bool {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        self.nonces.with_shard(nonce, |records| {
            let Some(record) = records.get(nonce) else {
                return false;
            };
            if record.is_expired(now, ttl) {
                records.remove(nonce);
                return false;
            }
            !record.consumed && owner.map_or(true, |o| record.owner == o)
        })
    }

    /// True iff present, unconsumed and within its TTL
    pub fn is_active(&self, nonce: &str) -> bool {
        self.check(nonce, None)
    }

    /// [`is_active`](Self::is_active), additionally requiring the recorded owner
    pub fn is_active_for(&self, nonce: &str, owner: &str) -> bool {
        self.check(nonce, Some(owner))
    }

    /// Atomically mark an active nonce consumed
    ///
    /// Returns false if the nonce is unknown, expired or already consumed.
    pub fn consume(&self, nonce: &str) -> bool {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let owner = self.nonces.with_shard(nonce, |records| {
            let record = records.get_mut(nonce)?;
            if record.consumed || record.is_expired(now, ttl) {
                return None;
            }
            record.consumed = true;
            Some(record.owner.clone())
        });

        let Some(owner) = owner else {
            return false;
        };

        self.owners.with_shard(owner.as_str(), |index| {
            if index.get(&owner).is_some_and(|current| current == nonce) {
                index.remove(&owner);
            }
        });
        debug!(owner = %owner, nonce = %fingerprint(nonce), "Consumed nonce");
        true
    }

    /// Remove expired records and consumed tombstones
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut removed: Vec<(String, String)> = Vec::new();

        self.nonces.for_each_shard(|records| {
            records.retain(|nonce, record| {
                let keep = !record.consumed && !record.is_expired(now, ttl);
                if !keep {
                    removed.push((record.owner.clone(), nonce.clone()));
                }
                keep
            });
        });

        for (owner, nonce) in &removed {
            self.owners.with_shard(owner.as_str(), |index| {
                if index.get(owner).is_some_and(|current| current == nonce) {
                    index.remove(owner);
                }
            });
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "Swept nonces");
        }
        removed.len()
    }

    /// Number of active nonces
    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut count = 0;
        self.nonces.for_each_shard(|records| {
            count += records
                .values()
                .filter(|r| !r.consumed && !r.is_expired(now, ttl))
                .count();
        });
        count
    }

    pub fn stats(&self) -> NonceStats {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let mut stats = NonceStats {
            total_issued: self.total_issued.load(Ordering::Relaxed),
            ..Default::default()
        };

        self.nonces.for_each_shard(|records| {
            for record in records.values() {
                if record.consumed {
                    stats.consumed_awaiting_sweep += 1;
                } else if !record.is_expired(now, ttl) {
                    stats.total_active_nonces += 1;
                    *stats
                        .agent_nonce_counts
                        .entry(record.owner.clone())
                        .or_insert(0) += 1;
                }
            }
        });
        stats.total_agents_with_nonces = stats.agent_nonce_counts.len();
        stats
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(NonceConfig::default())
    }
}
