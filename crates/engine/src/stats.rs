//! Process-lifetime engine counters.
//!
//! `StatsRecorder` is the live, lock-light recorder shared between the
//! batch processor and the background loops; `StorageStats` is the
//! point-in-time snapshot handed to callers.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_operations: u64,
    pub batched_operations: u64,
    pub total_batches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub average_batch_size: f64,
    pub average_processing_time_ms: f64,
    pub queue_length: usize,
    pub last_reset: DateTime<Utc>,
}

impl StorageStats {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_operations as f64
        }
    }
}

#[derive(Debug)]
struct RecorderInner {
    total_operations: AtomicU64,
    batched_operations: AtomicU64,
    total_batches: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    /// Recent (completion time, batch duration) samples; pruned by the
    /// background cleanup loop past the retention window.
    processing_samples: Mutex<VecDeque<(Instant, Duration)>>,
    last_reset: RwLock<DateTime<Utc>>,
}

/// Shared recorder; cheap to clone.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    inner: Arc<RecorderInner>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                total_operations: AtomicU64::new(0),
                batched_operations: AtomicU64::new(0),
                total_batches: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                processing_samples: Mutex::new(VecDeque::new()),
                last_reset: RwLock::new(Utc::now()),
            }),
        }
    }

    pub fn record_operation(&self) {
        self.inner.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, size: usize, duration: Duration) {
        self.inner
            .batched_operations
            .fetch_add(size as u64, Ordering::Relaxed);
        self.inner.total_batches.fetch_add(1, Ordering::Relaxed);
        self.inner
            .processing_samples
            .lock()
            .push_back((Instant::now(), duration));
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop processing-time samples older than `retention`.
    pub fn prune_samples(&self, retention: Duration) -> usize {
        let mut samples = self.inner.processing_samples.lock();
        let before = samples.len();
        samples.retain(|(at, _)| at.elapsed() <= retention);
        before - samples.len()
    }

    /// Snapshot the counters. `queue_length` is supplied by the caller,
    /// which owns the queues.
    pub fn snapshot(&self, queue_length: usize) -> StorageStats {
        let batched = self.inner.batched_operations.load(Ordering::Relaxed);
        let batches = self.inner.total_batches.load(Ordering::Relaxed);
        let average_batch_size = if batches == 0 {
            0.0
        } else {
            batched as f64 / batches as f64
        };

        let average_processing_time_ms = {
            let samples = self.inner.processing_samples.lock();
            if samples.is_empty() {
                0.0
            } else {
                let total: Duration = samples.iter().map(|(_, d)| *d).sum();
                total.as_secs_f64() * 1000.0 / samples.len() as f64
            }
        };

        StorageStats {
            total_operations: self.inner.total_operations.load(Ordering::Relaxed),
            batched_operations: batched,
            total_batches: batches,
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            average_batch_size,
            average_processing_time_ms,
            queue_length,
            last_reset: *self.inner.last_reset.read(),
        }
    }

    pub fn reset(&self) {
        self.inner.total_operations.store(0, Ordering::Relaxed);
        self.inner.batched_operations.store(0, Ordering::Relaxed);
        self.inner.total_batches.store(0, Ordering::Relaxed);
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        self.inner.cache_misses.store(0, Ordering::Relaxed);
        self.inner.errors.store(0, Ordering::Relaxed);
        self.inner.processing_samples.lock().clear();
        *self.inner.last_reset.write() = Utc::now();
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_are_running_means() {
        let recorder = StatsRecorder::new();
        recorder.record_batch(4, Duration::from_millis(10));
        recorder.record_batch(8, Duration::from_millis(30));

        let stats = recorder.snapshot(0);
        assert_eq!(stats.batched_operations, 12);
        assert_eq!(stats.total_batches, 2);
        assert!((stats.average_batch_size - 6.0).abs() < f64::EPSILON);
        assert!((stats.average_processing_time_ms - 20.0).abs() < 0.01);
    }

    #[test]
    fn hit_rate_and_error_rate() {
        let recorder = StatsRecorder::new();
        for _ in 0..3 {
            recorder.record_cache_hit();
        }
        recorder.record_cache_miss();
        recorder.record_operation();
        recorder.record_error();

        let stats = recorder.snapshot(5);
        assert!((stats.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((stats.error_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.queue_length, 5);
    }

    #[test]
    fn reset_clears_counters_and_bumps_timestamp() {
        let recorder = StatsRecorder::new();
        recorder.record_operation();
        recorder.record_batch(2, Duration::from_millis(5));
        let before = recorder.snapshot(0).last_reset;

        recorder.reset();
        let stats = recorder.snapshot(0);
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.total_batches, 0);
        assert!(stats.last_reset >= before);
    }

    #[test]
    fn prune_drops_only_old_samples() {
        let recorder = StatsRecorder::new();
        recorder.record_batch(1, Duration::from_millis(1));
        assert_eq!(recorder.prune_samples(Duration::from_secs(60)), 0);
        assert_eq!(recorder.prune_samples(Duration::ZERO), 1);
    }
}
