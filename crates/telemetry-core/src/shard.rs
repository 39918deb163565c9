//! Sharded concurrent map
//!
//! Keys hash to one of a fixed number of shards, each behind its own mutex,
//! so operations on unrelated keys do not contend. Closures passed to
//! [`ShardedMap::with_shard`] run with the shard locked and must not block.

use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Default number of shards
pub const DEFAULT_SHARDS: usize = 16;

pub struct ShardedMap<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
    hasher: RandomState,
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard_for<Q>(&self, key: &Q) -> &Mutex<HashMap<K, V>>
    where
        Q: Hash + ?Sized,
    {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Run `f` with exclusive access to the shard owning `key`
    ///
    /// `Q` must hash identically to `K` (e.g. `str` for `String`).
    pub fn with_shard<Q, R>(&self, key: &Q, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R
    where
        Q: Hash + ?Sized,
    {
        let mut guard = self.shard_for(key).lock();
        f(&mut *guard)
    }

    /// Visit every shard in turn, locking one at a time
    pub fn for_each_shard(&self, mut f: impl FnMut(&mut HashMap<K, V>)) {
        for shard in &self.shards {
            f(&mut *shard.lock());
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<K: Eq + Hash, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
