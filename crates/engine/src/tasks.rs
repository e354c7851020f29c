//! Background maintenance loops.
//!
//! Two interval-driven tasks: a cleanup loop that drops stale queued
//! operations, prunes old stat samples, and sweeps expired cache
//! entries; and a metrics loop that snapshots the engine counters,
//! records them as gauge series, and warns on unhealthy trends.

use crate::batch::BatchProcessor;
use crate::cache::MultiLevelCache;
use crate::config::StorageConfig;
use crate::metrics::{MetricKind, MetricsManager};
use crate::stats::StatsRecorder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle over the spawned maintenance loops.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl BackgroundTasks {
    /// Spawn the loops. The metrics loop is skipped entirely when
    /// metrics are disabled in the configuration.
    pub fn start(
        config: &StorageConfig,
        processor: BatchProcessor,
        cache: Arc<MultiLevelCache>,
        stats: StatsRecorder,
        metrics: MetricsManager,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::new();

        handles.push(spawn_cleanup_loop(
            config,
            processor.clone(),
            cache,
            stats.clone(),
            running.clone(),
        ));

        if config.enable_metrics {
            handles.push(spawn_metrics_loop(
                config,
                processor,
                stats,
                metrics,
                running.clone(),
            ));
        }

        Self { handles, running }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop and abort the loops. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_cleanup_loop(
    config: &StorageConfig,
    processor: BatchProcessor,
    cache: Arc<MultiLevelCache>,
    stats: StatsRecorder,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let period = config.cleanup_interval;
    let retention = config.queue_retention;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let dropped = processor.drop_stale(retention);
            let pruned = stats.prune_samples(retention);
            let purged = cache.purge_expired();
            tracing::debug!(dropped, pruned, purged, "cleanup pass finished");
        }
    })
}

fn spawn_metrics_loop(
    config: &StorageConfig,
    processor: BatchProcessor,
    stats: StatsRecorder,
    metrics: MetricsManager,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let period = config.metrics_collection_interval;
    let max_queue_size = config.max_queue_size;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let snapshot = stats.snapshot(processor.queue_length());
            metrics.record(
                "queue.length",
                MetricKind::Gauge,
                snapshot.queue_length as f64,
            );
            metrics.record(
                "cache.hit_rate",
                MetricKind::Rate,
                snapshot.cache_hit_rate(),
            );
            metrics.record("errors.rate", MetricKind::Rate, snapshot.error_rate());
            metrics.record(
                "batch.average_size",
                MetricKind::Gauge,
                snapshot.average_batch_size,
            );

            if snapshot.queue_length * 5 > max_queue_size * 4 {
                tracing::warn!(
                    queue_length = snapshot.queue_length,
                    max_queue_size,
                    "queue above 80% of capacity"
                );
            }
            if snapshot.error_rate() > 0.05 {
                tracing::warn!(
                    error_rate = snapshot.error_rate(),
                    "error rate above 5%"
                );
            }
            let lookups = snapshot.cache_hits + snapshot.cache_misses;
            if lookups >= 100 && snapshot.cache_hit_rate() < 0.5 {
                tracing::warn!(
                    hit_rate = snapshot.cache_hit_rate(),
                    "cache hit rate below 50%"
                );
            }
        }
    })
}
