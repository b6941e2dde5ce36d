// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sharded cache with a per-shard LRU fast path.
//!
//! # Layout
//!
//! ```text
//! key ──xxh3──► shard = hash % shard_count
//!                 │
//!                 ├─ map: RwLock<HashMap>      authoritative store
//!                 ├─ lru: Mutex<LruCache>      bounded accelerator
//!                 └─ hits / misses             per-shard counters
//! ```
//!
//! The map is the source of truth; the LRU may evict entries the map still
//! holds, and the next `get` promotes them back. Lock order is always
//! map then LRU, so the two locks cannot deadlock, and no operation ever
//! holds locks from two shards.
//!
//! # Example
//!
//! ```
//! use querykit::ShardedCache;
//!
//! let cache = ShardedCache::with_shards("fields", 4, 128);
//! cache.set("users", vec!["id".into(), "name".into()]);
//! assert_eq!(cache.get("users"), Some(vec!["id".to_string(), "name".to_string()]));
//!
//! cache.delete("users");
//! assert_eq!(cache.get("users"), None);
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::{Cache, CacheError};

/// Upper bound on shard count
pub const MAX_SHARDS: usize = 64;

/// LRU tier capacity per shard
pub const DEFAULT_LRU_CAPACITY: usize = 1024;

struct Shard {
    map: RwLock<HashMap<String, Vec<String>>>,
    lru: Mutex<LruCache<String, Vec<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Shard {
    fn new(lru_capacity: NonZeroUsize) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            lru: Mutex::new(LruCache::new(lru_capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// Counters for one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct ShardedCacheStats {
    pub shards: Vec<ShardStats>,
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

pub struct ShardedCache {
    name: &'static str,
    shards: Box<[Shard]>,
}

impl ShardedCache {
    /// One shard per available CPU, clamped to `1..=64`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self::with_shards(name, parallelism, DEFAULT_LRU_CAPACITY)
    }

    /// Explicit shard count (clamped to `1..=64`) and per-shard LRU capacity.
    #[must_use]
    pub fn with_shards(name: &'static str, shard_count: usize, lru_capacity: usize) -> Self {
        let shard_count = shard_count.clamp(1, MAX_SHARDS);
        let lru_capacity = NonZeroUsize::new(lru_capacity).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count).map(|_| Shard::new(lru_capacity)).collect();
        debug!(cache = name, shard_count, lru_capacity, "Sharded cache created");
        Self { name, shards }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Deterministic shard for `key`
    #[must_use]
    pub fn shard_index(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Look `key` up, LRU tier first, then the map (promoting on a map hit).
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let shard = self.shard(key);
        let map = shard.map.read();

        if let Some(value) = shard.lru.lock().get(key) {
            shard.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(self.name, true);
            return Some(value.clone());
        }

        if let Some(value) = map.get(key) {
            shard.lru.lock().put(key.to_string(), value.clone());
            shard.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(self.name, true);
            return Some(value.clone());
        }

        shard.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_lookup(self.name, false);
        None
    }

    /// Write to both tiers.
    pub fn set(&self, key: &str, value: Vec<String>) {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        shard.lru.lock().put(key.to_string(), value.clone());
        map.insert(key.to_string(), value);
    }

    /// Remove from both tiers. Absence is not an error.
    pub fn delete(&self, key: &str) {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        map.remove(key);
        shard.lru.lock().pop(key);
    }

    /// Empty every shard and zero its counters, one shard at a time.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            *map = HashMap::new();
            shard.lru.lock().clear();
            shard.hits.store(0, Ordering::Relaxed);
            shard.misses.store(0, Ordering::Relaxed);
        }
        crate::metrics::set_cache_entries(self.name, 0);
    }

    /// Entries in the authoritative tier
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    #[must_use]
    pub fn stats(&self) -> ShardedCacheStats {
        let shards: Vec<ShardStats> = self
            .shards
            .iter()
            .map(|s| ShardStats {
                hits: s.hits.load(Ordering::Relaxed),
                misses: s.misses.load(Ordering::Relaxed),
                entries: s.map.read().len(),
            })
            .collect();

        let hits: u64 = shards.iter().map(|s| s.hits).sum();
        let misses: u64 = shards.iter().map(|s| s.misses).sum();
        let entry_count: usize = shards.iter().map(|s| s.entries).sum();
        let total = hits + misses;
        crate::metrics::set_cache_entries(self.name, entry_count);

        ShardedCacheStats {
            shards,
            hits,
            misses,
            entry_count,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl Cache for ShardedCache {
    fn get(&self, key: &str) -> Option<Vec<String>> {
        ShardedCache::get(self, key)
    }

    fn set(&self, key: &str, value: Vec<String>) {
        ShardedCache::set(self, key, value);
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        ShardedCache::delete(self, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn value(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn test_shard_count_is_clamped() {
        assert_eq!(ShardedCache::with_shards("t", 0, 8).shard_count(), 1);
        assert_eq!(ShardedCache::with_shards("t", 500, 8).shard_count(), MAX_SHARDS);
        let auto = ShardedCache::new("t");
        assert!((1..=MAX_SHARDS).contains(&auto.shard_count()));
    }

    #[test]
    fn test_shard_index_is_deterministic() {
        let cache = ShardedCache::with_shards("t", 8, 8);
        for key in ["a", "users", "SELECT ?", ""] {
            let first = cache.shard_index(key);
            assert!(first < 8);
            for _ in 0..10 {
                assert_eq!(cache.shard_index(key), first);
            }
        }
    }

    #[test]
    fn test_set_then_get() {
        let cache = ShardedCache::with_shards("t", 4, 8);
        cache.set("k", value("v"));
        assert_eq!(cache.get("k"), Some(value("v")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_updates_both_tiers() {
        let cache = ShardedCache::with_shards("t", 1, 8);
        cache.set("k", value("old"));
        cache.set("k", value("new"));
        assert_eq!(cache.get("k"), Some(value("new")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete_then_get_misses() {
        let cache = ShardedCache::with_shards("t", 4, 8);
        cache.set("k", value("v"));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
        // deleting a missing key is fine
        cache.delete("never-there");
        assert!(Cache::delete(&cache, "never-there").is_ok());
    }

    #[test]
    fn test_lru_eviction_repopulates_from_map() {
        // one shard, LRU holds a single entry
        let cache = ShardedCache::with_shards("t", 1, 1);
        cache.set("a", value("1"));
        cache.set("b", value("2")); // evicts "a" from the LRU tier only

        assert_eq!(cache.get("a"), Some(value("1")));
        assert_eq!(cache.get("b"), Some(value("2")));
        assert_eq!(cache.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_hit_miss_counters_and_rate() {
        let cache = ShardedCache::with_shards("t", 2, 8);
        cache.set("k", value("v"));
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate - 0.75).abs() < 0.01);
        assert_eq!(stats.shards.len(), 2);
    }

    #[test]
    fn test_clear_resets_entries_and_counters() {
        let cache = ShardedCache::with_shards("t", 4, 8);
        for i in 0..20 {
            cache.set(&format!("k{i}"), value("v"));
        }
        cache.get("k1");
        cache.get("nope");

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get("k1"), None);
        let stats = cache.stats();
        // only the lookup right above
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let cache = Arc::new(ShardedCache::with_shards("t", 8, 16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{t}-k{i}");
                        cache.set(&key, value("v"));
                        assert_eq!(cache.get(&key), Some(value("v")));
                        if i % 3 == 0 {
                            cache.delete(&key);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 500 keys per thread, every third deleted
        assert_eq!(cache.len(), 8 * (500 - 167));
    }
}
