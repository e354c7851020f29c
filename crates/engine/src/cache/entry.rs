//! Cache entry bookkeeping.

use std::time::{Duration, Instant};
use strata_core::Priority;

/// One cached value with its access metadata.
///
/// `touch` is the only mutator of `last_accessed`/`access_count`; the
/// owning cache level calls it on every hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub size: u64,
    pub ttl: Option<Duration>,
    pub priority: Priority,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        priority: Priority,
    ) -> Self {
        let now = Instant::now();
        let key = key.into();
        let size = estimate_size(&key, &value);
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size,
            ttl,
            priority,
        }
    }

    /// Expired iff a TTL is set and the entry's age exceeds it.
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() > ttl,
            None => false,
        }
    }

    /// Record a hit.
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_accessed.elapsed()
    }

    /// Time until expiry, if a TTL is set. Zero once expired.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl.map(|ttl| ttl.saturating_sub(self.created_at.elapsed()))
    }
}

/// Rough resident size of an entry: the key plus the serialized value.
fn estimate_size(key: &str, value: &serde_json::Value) -> u64 {
    let value_size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    (key.len() + value_size) as u64
}
