//! Hierarchical multi-level cache.
//!
//! Three levels, L1 fastest and smallest through L3 largest and slowest,
//! each with an independent capacity and eviction policy instance. By
//! default only L1 is consulted and populated; the higher levels are
//! constructed as extension points. Eviction runs synchronously inside
//! `set` when a level exceeds capacity.

pub mod entry;
pub mod eviction;

pub use entry::CacheEntry;
pub use eviction::{create_policy, EvictionPolicy, EvictionPolicyKind};

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strata_core::Priority;

/// Per-level counters, updated on every get/set.
#[derive(Debug, Default)]
struct LevelCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of one level's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLevelStats {
    pub level: String,
    pub policy: &'static str,
    pub entries: usize,
    pub capacity: usize,
    pub memory_usage: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Configuration for one cache level.
#[derive(Debug, Clone)]
pub struct CacheLevelConfig {
    pub name: String,
    pub capacity: usize,
    pub policy: EvictionPolicyKind,
    pub default_ttl: Option<Duration>,
}

/// One cache level: an entry map guarded by a single lock, plus its
/// eviction policy and counters.
pub struct CacheLevel {
    name: String,
    capacity: usize,
    default_ttl: Option<Duration>,
    policy: Box<dyn EvictionPolicy>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    counters: LevelCounters,
}

impl CacheLevel {
    pub fn new(config: CacheLevelConfig) -> Self {
        Self {
            name: config.name,
            capacity: config.capacity,
            default_ttl: config.default_ttl,
            policy: create_policy(config.policy),
            entries: Mutex::new(HashMap::new()),
            counters: LevelCounters::default(),
        }
    }

    /// Look up a key. Expired entries are removed and count as misses;
    /// hits touch the entry.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.touch();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value, evicting synchronously if the level overflows.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        priority: Priority,
    ) {
        let key = key.into();
        let entry = CacheEntry::new(key.clone(), value, ttl.or(self.default_ttl), priority);

        let mut entries = self.entries.lock();
        entries.insert(key, entry);

        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            let victims = self.policy.select_victims(&entries, excess);
            for victim in victims {
                if entries.remove(&victim).is_some() {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        before - entries.len()
    }

    pub fn stats(&self) -> CacheLevelStats {
        let (entries, memory_usage) = {
            let map = self.entries.lock();
            (map.len(), map.values().map(|e| e.size).sum())
        };
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheLevelStats {
            level: self.name.clone(),
            policy: self.policy.name(),
            entries,
            capacity: self.capacity,
            memory_usage,
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// The L1/L2/L3 hierarchy.
pub struct MultiLevelCache {
    levels: Vec<CacheLevel>,
    /// How many levels are actually consulted/populated; the rest exist
    /// as extension points.
    active_levels: usize,
}

impl MultiLevelCache {
    /// Build the default hierarchy: L1 at the configured capacity, L2 and
    /// L3 progressively larger but inactive.
    pub fn new(l1_capacity: usize, default_ttl: Option<Duration>, policy: EvictionPolicyKind) -> Self {
        let levels = vec![
            CacheLevel::new(CacheLevelConfig {
                name: "l1".into(),
                capacity: l1_capacity,
                policy,
                default_ttl,
            }),
            CacheLevel::new(CacheLevelConfig {
                name: "l2".into(),
                capacity: l1_capacity.saturating_mul(10),
                policy,
                default_ttl,
            }),
            CacheLevel::new(CacheLevelConfig {
                name: "l3".into(),
                capacity: l1_capacity.saturating_mul(100),
                policy,
                default_ttl,
            }),
        ];
        Self {
            levels,
            active_levels: 1,
        }
    }

    /// Check active levels in order, first hit wins.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        for level in &self.levels[..self.active_levels] {
            if let Some(value) = level.get(key) {
                return Some(value);
            }
        }
        None
    }

    /// Write to L1.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        priority: Priority,
    ) {
        self.levels[0].set(key, value, ttl, priority);
    }

    pub fn remove(&self, key: &str) {
        for level in &self.levels[..self.active_levels] {
            level.remove(key);
        }
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        self.levels[..self.active_levels]
            .iter()
            .map(|l| l.remove_prefix(prefix))
            .sum()
    }

    pub fn clear(&self) {
        for level in &self.levels {
            level.clear();
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.levels[..self.active_levels]
            .iter()
            .map(|l| l.purge_expired())
            .sum()
    }

    pub fn stats(&self) -> Vec<CacheLevelStats> {
        self.levels.iter().map(|l| l.stats()).collect()
    }

    /// L1 stats, the level every lookup touches.
    pub fn l1_stats(&self) -> CacheLevelStats {
        self.levels[0].stats()
    }
}
