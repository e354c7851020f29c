//! Engine configuration with fail-fast validation.

use crate::cache::eviction::EvictionPolicyKind;
use crate::pipeline::{CompressionKind, SerializationFormat};
use std::time::Duration;
use strata_core::{Error, Priority, Result};

/// Per-priority debounce intervals.
///
/// `critical` must stay at zero: critical operations are dispatched
/// immediately and never sit in a debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceIntervals {
    pub critical: Duration,
    pub high: Duration,
    pub normal: Duration,
    pub low: Duration,
}

impl Default for DebounceIntervals {
    fn default() -> Self {
        Self {
            critical: Duration::ZERO,
            high: Duration::from_millis(50),
            normal: Duration::from_millis(100),
            low: Duration::from_millis(500),
        }
    }
}

impl DebounceIntervals {
    pub fn for_priority(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

/// Immutable tunables for the storage engine.
///
/// Validated once via [`StorageConfig::validate`] at engine construction;
/// an invalid configuration is a fatal error, never a runtime fallback.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Maximum queued operations across all priorities
    pub max_queue_size: usize,
    /// Maximum operations dequeued into one batch
    pub max_batch_size: usize,
    /// Debounce window per priority
    pub debounce: DebounceIntervals,
    /// Base delay for retry backoff
    pub base_retry_delay: Duration,
    /// Cap on retry backoff delay
    pub max_retry_delay: Duration,
    /// Multiplier applied per retry attempt, must exceed 1.0
    pub retry_backoff_factor: f64,
    /// Default retry budget for operations that do not specify one
    pub default_max_retries: u32,
    /// Whether the background metrics loop runs
    pub enable_metrics: bool,
    /// Wake interval of the metrics emission loop
    pub metrics_collection_interval: Duration,
    /// Wake interval of the stale-state cleanup loop
    pub cleanup_interval: Duration,
    /// Queued operations older than this are dropped by cleanup
    pub queue_retention: Duration,
    /// L1 cache capacity in entries
    pub memory_max_size: usize,
    /// Default TTL applied to cache entries without an explicit one
    pub memory_default_ttl: Option<Duration>,
    /// Serialization format for stored values
    pub serialization_format: SerializationFormat,
    /// Compression algorithm for stored values
    pub compression: CompressionKind,
    /// Minimum serialized size before compression is attempted
    pub compression_threshold: usize,
    /// Eviction policy used by the cache levels
    pub eviction_policy: EvictionPolicyKind,
    /// Maximum retained data points per metric series
    pub metrics_retention_points: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_batch_size: 100,
            debounce: DebounceIntervals::default(),
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(30),
            retry_backoff_factor: 2.0,
            default_max_retries: 3,
            enable_metrics: true,
            metrics_collection_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
            queue_retention: Duration::from_secs(3600),
            memory_max_size: 10_000,
            memory_default_ttl: Some(Duration::from_secs(3600)),
            serialization_format: SerializationFormat::Json,
            compression: CompressionKind::Zstd,
            compression_threshold: 1024,
            eviction_policy: EvictionPolicyKind::Lru,
            metrics_retention_points: 1000,
        }
    }
}

impl StorageConfig {
    /// Check every tunable, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::configuration("max_queue_size must be positive"));
        }
        if self.max_batch_size == 0 {
            return Err(Error::configuration("max_batch_size must be positive"));
        }
        if self.max_batch_size > self.max_queue_size {
            return Err(Error::configuration(format!(
                "max_batch_size {} exceeds max_queue_size {}",
                self.max_batch_size, self.max_queue_size
            )));
        }
        if self.debounce.critical != Duration::ZERO {
            return Err(Error::configuration(
                "critical debounce interval must be zero",
            ));
        }
        if self.base_retry_delay == Duration::ZERO {
            return Err(Error::configuration("base_retry_delay must be positive"));
        }
        if self.max_retry_delay <= self.base_retry_delay {
            return Err(Error::configuration(
                "max_retry_delay must exceed base_retry_delay",
            ));
        }
        if self.retry_backoff_factor <= 1.0 {
            return Err(Error::configuration(
                "retry_backoff_factor must exceed 1.0",
            ));
        }
        if self.memory_max_size == 0 {
            return Err(Error::configuration("memory_max_size must be positive"));
        }
        Ok(())
    }

    /// Retry delay for a given attempt: exponential backoff capped at
    /// `max_retry_delay`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let factor = self.retry_backoff_factor.powi(retry_count as i32);
        let delay = self.base_retry_delay.mul_f64(factor);
        delay.min(self.max_retry_delay)
    }
}
