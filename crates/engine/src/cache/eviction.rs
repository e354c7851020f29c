//! Eviction policies for cache levels.
//!
//! A policy selects victims from the entry map when a level exceeds its
//! capacity; the owning level performs the removal synchronously inside
//! `set`, never deferred.

use super::entry::CacheEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of eviction policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    Lru,
    Lfu,
    Fifo,
    Ttl,
    Adaptive,
}

/// Victim selection over a level's entry map.
pub trait EvictionPolicy: Send + Sync {
    /// Policy name for metrics and diagnostics.
    fn name(&self) -> &'static str;

    /// Choose up to `count` keys to evict, worst candidates first.
    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String>;
}

/// Map a policy kind to its implementation.
pub fn create_policy(kind: EvictionPolicyKind) -> Box<dyn EvictionPolicy> {
    match kind {
        EvictionPolicyKind::Lru => Box::new(LruPolicy),
        EvictionPolicyKind::Lfu => Box::new(LfuPolicy),
        EvictionPolicyKind::Fifo => Box::new(FifoPolicy),
        EvictionPolicyKind::Ttl => Box::new(TtlPolicy),
        EvictionPolicyKind::Adaptive => Box::new(AdaptivePolicy),
    }
}

fn take_sorted_by<F>(entries: &HashMap<String, CacheEntry>, count: usize, mut key_fn: F) -> Vec<String>
where
    F: FnMut(&CacheEntry) -> f64,
{
    let mut candidates: Vec<(&String, f64)> =
        entries.iter().map(|(k, e)| (k, key_fn(e))).collect();
    // Highest score evicted first.
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates
        .into_iter()
        .take(count)
        .map(|(k, _)| k.clone())
        .collect()
}

/// Evict entries with the oldest `last_accessed`.
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        take_sorted_by(entries, count, |e| e.idle().as_secs_f64())
    }
}

/// Evict entries with the lowest `access_count`.
pub struct LfuPolicy;

impl EvictionPolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        take_sorted_by(entries, count, |e| -(e.access_count as f64))
    }
}

/// Evict entries with the oldest `created_at`.
pub struct FifoPolicy;

impl EvictionPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        take_sorted_by(entries, count, |e| e.age().as_secs_f64())
    }
}

/// Evict expired entries first, then the entries nearest to expiry.
pub struct TtlPolicy;

impl EvictionPolicy for TtlPolicy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        take_sorted_by(entries, count, |e| {
            if e.is_expired() {
                return f64::INFINITY;
            }
            match e.remaining_ttl() {
                // Closer to expiry scores higher.
                Some(remaining) => -remaining.as_secs_f64(),
                // No TTL: last resort.
                None => f64::NEG_INFINITY,
            }
        })
    }
}

/// Composite score: normalized age + inverse access count + normalized
/// idle time. Anything already expired goes first.
pub struct AdaptivePolicy;

impl EvictionPolicy for AdaptivePolicy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn select_victims(&self, entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        let max_age = entries
            .values()
            .map(|e| e.age().as_secs_f64())
            .fold(f64::EPSILON, f64::max);
        let max_idle = entries
            .values()
            .map(|e| e.idle().as_secs_f64())
            .fold(f64::EPSILON, f64::max);

        take_sorted_by(entries, count, |e| {
            if e.is_expired() {
                return f64::INFINITY;
            }
            let age_score = e.age().as_secs_f64() / max_age;
            let frequency_score = 1.0 / (e.access_count.max(1) as f64);
            let idle_score = e.idle().as_secs_f64() / max_idle;
            age_score + frequency_score + idle_score
        })
    }
}
