//! Debounced, priority-ordered batch processor.
//!
//! Each priority owns a queue and a debounce timer. Every arrival
//! replaces the pending timer for its priority; when the timer fires, up
//! to `max_batch_size` operations are dequeued (the lock covers only the
//! dequeue), grouped by backend kind, and dispatched group by group.
//! Failures retry with capped exponential backoff inside a supervised
//! task set; exhausted operations are logged, recorded in the batch's
//! error list, and dropped.

use crate::backend::{BackendKind, BackendSet, StorageBackend};
use crate::cache::MultiLevelCache;
use crate::config::StorageConfig;
use crate::metrics::{MetricKind, MetricsManager};
use crate::operation::{BatchResult, OperationFailure, StorageOperation};
use crate::pipeline::Pipeline;
use crate::stats::StatsRecorder;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{Error, OperationType, Priority, Result};
use tokio::task::{JoinHandle, JoinSet};

struct Inner {
    config: StorageConfig,
    backends: BackendSet,
    cache: Arc<MultiLevelCache>,
    pipeline: Arc<Pipeline>,
    stats: StatsRecorder,
    metrics: MetricsManager,
    queues: HashMap<Priority, Mutex<VecDeque<StorageOperation>>>,
    // Admission counter; the single point where capacity is enforced.
    // Incremented before a push, decremented when operations leave a queue.
    queued_total: AtomicUsize,
    timers: Mutex<HashMap<Priority, JoinHandle<()>>>,
    retries: Mutex<JoinSet<()>>,
    enabled: AtomicBool,
}

/// The queue engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<Inner>,
}

impl BatchProcessor {
    pub fn new(
        config: StorageConfig,
        backends: BackendSet,
        cache: Arc<MultiLevelCache>,
        pipeline: Arc<Pipeline>,
        stats: StatsRecorder,
        metrics: MetricsManager,
    ) -> Self {
        let queues = Priority::ALL
            .into_iter()
            .map(|p| (p, Mutex::new(VecDeque::new())))
            .collect();
        Self {
            inner: Arc::new(Inner {
                config,
                backends,
                cache,
                pipeline,
                stats,
                metrics,
                queues,
                queued_total: AtomicUsize::new(0),
                timers: Mutex::new(HashMap::new()),
                retries: Mutex::new(JoinSet::new()),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Total operations queued across all priorities.
    pub fn queue_length(&self) -> usize {
        self.inner.queued_total.load(Ordering::SeqCst)
    }

    /// Queue an operation and (re)schedule its priority's debounce.
    pub fn enqueue(&self, op: StorageOperation) -> Result<()> {
        self.try_enqueue(op).map_err(|(_, e)| e)
    }

    fn try_enqueue(&self, op: StorageOperation) -> std::result::Result<(), (StorageOperation, Error)> {
        let max = self.inner.config.max_queue_size;
        // Reserve a slot in one atomic step so concurrent enqueues
        // cannot both pass a stale total and overshoot the cap.
        let reserved = self
            .inner
            .queued_total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            });
        if let Err(current) = reserved {
            return Err((op, Error::QueueFull { current, max }));
        }

        let priority = op.priority;
        let queued = {
            let mut queue = self.inner.queues[&priority].lock();
            queue.push_back(op);
            queue.len()
        };
        self.schedule(priority, queued);
        Ok(())
    }

    /// Arrange for `priority`'s queue to be processed. Critical flushes
    /// immediately; a full batch flushes immediately; otherwise the
    /// pending debounce timer is replaced, restarting the window.
    ///
    /// Only the sleeping phase is abortable. The flush itself runs in a
    /// detached task, so replacing a timer can never cancel a dispatch
    /// that already started.
    fn schedule(&self, priority: Priority, queued: usize) {
        let delay = self.inner.config.debounce.for_priority(priority);
        let fire_now = priority == Priority::Critical
            || delay == Duration::ZERO
            || queued >= self.inner.config.max_batch_size;

        if fire_now {
            if let Some(pending) = self.inner.timers.lock().remove(&priority) {
                pending.abort();
            }
            let this = self.clone();
            tokio::spawn(async move {
                this.process_due(priority).await;
            });
            return;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(async move {
                this.process_due(priority).await;
            });
        });
        if let Some(previous) = self.inner.timers.lock().insert(priority, handle) {
            previous.abort();
        }
    }

    /// Dequeue and dispatch one batch for `priority`.
    pub async fn process_due(&self, priority: Priority) -> BatchResult {
        let started = Instant::now();

        let batch: Vec<StorageOperation> = {
            let mut queue = self.inner.queues[&priority].lock();
            let take = queue.len().min(self.inner.config.max_batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return BatchResult::default();
        }
        self.inner.queued_total.fetch_sub(batch.len(), Ordering::SeqCst);

        let mut result = BatchResult {
            total: batch.len(),
            ..Default::default()
        };

        let mut groups: HashMap<BackendKind, Vec<StorageOperation>> = HashMap::new();
        for op in batch {
            groups.entry(op.backend).or_default().push(op);
        }

        for (kind, ops) in groups {
            let backend = self.inner.backends.get(&kind).cloned();
            for mut op in ops {
                match &backend {
                    Some(backend) => self.run_one(backend, &mut op, &mut result).await,
                    None => {
                        // No constructor registered for this kind; the
                        // operation can never succeed, fail it terminally.
                        let error = Error::backend(
                            kind.as_str(),
                            op.key.clone(),
                            "backend not configured",
                        );
                        self.fail_terminally(&mut op, error.to_string(), &mut result);
                    }
                }
            }
        }

        result.duration = started.elapsed();
        self.inner.stats.record_batch(result.total, result.duration);
        self.inner.metrics.record(
            "batch.size",
            MetricKind::Histogram,
            result.total as f64,
        );
        self.inner.metrics.record(
            "batch.duration_ms",
            MetricKind::Timer,
            result.duration.as_secs_f64() * 1000.0,
        );
        tracing::debug!(
            priority = %priority,
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "batch processed"
        );

        // Anything beyond the batch cap stays queued; restart the window.
        let remaining = self.inner.queues[&priority].lock().len();
        if remaining > 0 && self.inner.enabled.load(Ordering::SeqCst) {
            self.schedule(priority, remaining);
        }

        result
    }

    async fn run_one(
        &self,
        backend: &Arc<dyn StorageBackend>,
        op: &mut StorageOperation,
        result: &mut BatchResult,
    ) {
        self.inner
            .metrics
            .start_operation(op.operation_id, op.operation_type);

        match self.execute(backend, op).await {
            Ok(()) => {
                self.inner.metrics.complete_operation(op.operation_id, true);
                op.resolve(true, None);
                result.succeeded += 1;
            }
            Err(error) if op.can_retry() => {
                op.retry_count += 1;
                let delay = self.inner.config.retry_delay(op.retry_count);
                tracing::debug!(
                    operation_id = %op.operation_id,
                    attempt = op.retry_count,
                    ?delay,
                    "operation failed, scheduling retry: {error}"
                );
                self.schedule_retry(std::mem::replace(op, StorageOperation::tombstone()), delay);
            }
            Err(error) => {
                let exhausted = Error::RetryExhausted {
                    retry_count: op.retry_count,
                    max_retries: op.max_retries,
                    last_error: error.to_string(),
                };
                self.fail_terminally(op, exhausted.to_string(), result);
            }
        }
    }

    fn fail_terminally(&self, op: &mut StorageOperation, error: String, result: &mut BatchResult) {
        tracing::warn!(
            operation_id = %op.operation_id,
            key = %op.key,
            "operation dropped: {error}"
        );
        self.inner.metrics.complete_operation(op.operation_id, false);
        self.inner.stats.record_error();
        result.failed += 1;
        result.failures.push(OperationFailure {
            operation_id: op.operation_id,
            key: op.key.clone(),
            error: error.clone(),
        });
        op.resolve(false, Some(error));
    }

    /// Re-enqueue `op` after `delay`, as if it were a new arrival. The
    /// task lives in the supervised retry set so shutdown can cancel the
    /// whole group.
    fn schedule_retry(&self, op: StorageOperation, delay: Duration) {
        let this = self.clone();
        let mut retries = self.inner.retries.lock();
        // Reap finished retry tasks so the set stays bounded.
        while retries.try_join_next().is_some() {}
        retries.spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.inner.enabled.load(Ordering::SeqCst) {
                return;
            }
            if let Err((mut op, error)) = this.try_enqueue(op) {
                this.inner.stats.record_error();
                op.resolve(false, Some(error.to_string()));
                tracing::warn!(operation_id = %op.operation_id, "retry dropped: {error}");
            }
        });
    }

    async fn execute(&self, backend: &Arc<dyn StorageBackend>, op: &mut StorageOperation) -> Result<()> {
        let cache_key = format!("{}:{}", op.backend, op.key);
        match op.operation_type {
            OperationType::Set => {
                let value = op.value.as_ref().ok_or_else(|| {
                    Error::validation("value", "set operation without a value")
                })?;
                let (bytes, _) = self.inner.pipeline.encode_value(&op.key, value)?;
                backend.set(&op.key, bytes, op.ttl).await?;
                self.inner
                    .cache
                    .set(cache_key, value.clone(), op.ttl, op.priority);
                Ok(())
            }
            OperationType::Delete => {
                backend.delete(&op.key).await?;
                self.inner.cache.remove(&cache_key);
                Ok(())
            }
            OperationType::Clear => {
                backend.clear().await?;
                self.inner.cache.remove_prefix(&format!("{}:", op.backend));
                Ok(())
            }
            OperationType::Exists => backend.exists(&op.key).await.map(|_| ()),
            OperationType::Get => backend.get(&op.key).await.map(|_| ()),
        }
    }

    /// Drop queued operations older than `retention`, resolving their
    /// completion channels with a failure.
    pub fn drop_stale(&self, retention: Duration) -> usize {
        let mut dropped = 0;
        for queue in self.inner.queues.values() {
            let mut queue = queue.lock();
            let mut kept = VecDeque::with_capacity(queue.len());
            for mut op in queue.drain(..) {
                if op.age() > retention {
                    op.resolve(false, Some("operation expired in queue".into()));
                    dropped += 1;
                } else {
                    kept.push_back(op);
                }
            }
            *queue = kept;
        }
        if dropped > 0 {
            self.inner.queued_total.fetch_sub(dropped, Ordering::SeqCst);
            tracing::info!(dropped, "stale queued operations removed");
        }
        dropped
    }

    /// Process every queue to empty. Used by shutdown.
    pub async fn drain(&self) {
        for priority in Priority::ALL {
            loop {
                let result = self.process_due(priority).await;
                if result.total == 0 {
                    break;
                }
            }
        }
    }

    /// Stop accepting timer-driven work: cancel debounce timers and the
    /// retry group. Queued operations are left for `drain`.
    pub fn stop(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        for (_, handle) in self.inner.timers.lock().drain() {
            handle.abort();
        }
        self.inner.retries.lock().abort_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }
}

impl StorageOperation {
    /// Placeholder left behind when an operation moves into a retry
    /// task. Never enqueued or executed.
    fn tombstone() -> Self {
        let (op, _rx) = StorageOperation::new(
            OperationType::Get,
            "__tombstone__",
            None,
            BackendKind::Memory,
            Priority::Low,
            0,
        );
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHealth, MemoryBackend};
    use crate::cache::{EvictionPolicyKind, MultiLevelCache};
    use crate::pipeline::{CompressionKind, SerializationFormat};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` set calls, then succeeds.
    struct FlakyBackend {
        attempts: AtomicU32,
        failures: u32,
        store: MemoryBackend,
    }

    impl FlakyBackend {
        fn failing(failures: u32) -> Self {
            Self {
                attempts: AtomicU32::new(0),
                failures,
                store: MemoryBackend::new(),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.store.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(Error::backend("flaky", key, "transient outage"));
            }
            self.store.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.store.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.store.exists(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.store.clear().await
        }

        async fn health_check(&self) -> BackendHealth {
            BackendHealth::available("test backend")
        }
    }

    fn processor_with(backend: Arc<dyn StorageBackend>, config: StorageConfig) -> (BatchProcessor, StatsRecorder) {
        let mut backends: BackendSet = HashMap::new();
        backends.insert(BackendKind::Memory, backend);
        let cache = Arc::new(MultiLevelCache::new(64, None, EvictionPolicyKind::Lru));
        let pipeline = Arc::new(Pipeline::new(
            SerializationFormat::Json,
            CompressionKind::None,
            1024,
        ));
        let stats = StatsRecorder::new();
        let metrics = MetricsManager::new(100);
        let processor = BatchProcessor::new(config, backends, cache, pipeline, stats.clone(), metrics);
        (processor, stats)
    }

    fn set_op(key: &str, priority: Priority, max_retries: u32) -> (StorageOperation, crate::operation::CompletionReceiver) {
        StorageOperation::new(
            OperationType::Set,
            key,
            Some(json!({"k": key})),
            BackendKind::Memory,
            priority,
            max_retries,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_arrivals_coalesce_into_one_batch() {
        let (processor, stats) =
            processor_with(Arc::new(MemoryBackend::new()), StorageConfig::default());

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (op, rx) = set_op(&format!("k{i}"), Priority::Normal, 3);
            processor.enqueue(op).unwrap();
            receivers.push(rx);
        }

        for rx in receivers {
            assert!(rx.await.unwrap().succeeded);
        }
        let snapshot = stats.snapshot(processor.queue_length());
        assert_eq!(snapshot.total_batches, 1);
        assert_eq!(snapshot.batched_operations, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_respect_the_size_cap() {
        let config = StorageConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let (processor, stats) = processor_with(Arc::new(MemoryBackend::new()), config);

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (op, rx) = set_op(&format!("k{i}"), Priority::Low, 3);
            processor.enqueue(op).unwrap();
            receivers.push(rx);
        }

        for rx in receivers {
            assert!(rx.await.unwrap().succeeded);
        }
        let snapshot = stats.snapshot(processor.queue_length());
        assert_eq!(snapshot.batched_operations, 5);
        assert!(snapshot.total_batches >= 3);
        assert!(snapshot.average_batch_size <= 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_with_sizes() {
        let config = StorageConfig {
            max_queue_size: 2,
            max_batch_size: 2,
            ..Default::default()
        };
        let (processor, _) = processor_with(Arc::new(MemoryBackend::new()), config);

        for i in 0..2 {
            let (op, _rx) = set_op(&format!("k{i}"), Priority::Low, 0);
            processor.enqueue(op).unwrap();
        }
        let (op, _rx) = set_op("overflow", Priority::Low, 0);
        match processor.enqueue(op) {
            Err(Error::QueueFull { current, max }) => {
                assert_eq!(current, 2);
                assert_eq!(max, 2);
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_never_overshoot_the_cap() {
        // A long debounce keeps every accepted operation queued for the
        // duration of the test, so the final counts are exact.
        let config = StorageConfig {
            max_queue_size: 32,
            debounce: crate::config::DebounceIntervals {
                low: Duration::from_secs(60),
                ..Default::default()
            },
            ..Default::default()
        };
        let (processor, _) = processor_with(Arc::new(MemoryBackend::new()), config);

        let mut handles = Vec::new();
        for i in 0..64 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                let (op, _rx) = set_op(&format!("k{i}"), Priority::Low, 0);
                processor.enqueue(op).is_ok()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 32);
        assert_eq!(processor.queue_length(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success() {
        let backend = Arc::new(FlakyBackend::failing(2));
        let (processor, stats) = processor_with(backend.clone(), StorageConfig::default());

        let (op, rx) = set_op("k", Priority::High, 3);
        processor.enqueue(op).unwrap();

        let outcome = rx.await.unwrap();
        assert!(outcome.succeeded, "{:?}", outcome.error);
        assert_eq!(backend.attempts(), 3);
        assert_eq!(stats.snapshot(0).errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_resolve_as_failed() {
        let backend = Arc::new(FlakyBackend::failing(u32::MAX));
        let (processor, stats) = processor_with(backend.clone(), StorageConfig::default());

        let (op, rx) = set_op("k", Priority::High, 2);
        processor.enqueue(op).unwrap();

        let outcome = rx.await.unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("2"));
        assert_eq!(backend.attempts(), 3); // initial attempt plus two retries
        assert_eq!(stats.snapshot(0).errors, 1);
        assert_eq!(processor.queue_length(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_operations_skip_the_debounce_window() {
        let (processor, stats) =
            processor_with(Arc::new(MemoryBackend::new()), StorageConfig::default());

        let (op, rx) = set_op("urgent", Priority::Critical, 0);
        processor.enqueue(op).unwrap();
        assert!(rx.await.unwrap().succeeded);
        assert_eq!(stats.snapshot(0).total_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stale_resolves_expired_operations() {
        let (processor, _) =
            processor_with(Arc::new(MemoryBackend::new()), StorageConfig::default());

        let (op, rx) = set_op("old", Priority::Low, 0);
        processor.enqueue(op).unwrap();

        assert_eq!(processor.drop_stale(Duration::ZERO), 1);
        let outcome = rx.await.unwrap();
        assert!(!outcome.succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_empties_every_queue() {
        let (processor, _) =
            processor_with(Arc::new(MemoryBackend::new()), StorageConfig::default());

        for priority in [Priority::Low, Priority::Normal, Priority::High] {
            let (op, _rx) = set_op("k", priority, 0);
            processor.enqueue(op).unwrap();
        }
        processor.drain().await;
        assert_eq!(processor.queue_length(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_backend_fails_terminally() {
        let config = StorageConfig::default();
        let backends: BackendSet = HashMap::new();
        let cache = Arc::new(MultiLevelCache::new(64, None, EvictionPolicyKind::Lru));
        let pipeline = Arc::new(Pipeline::new(
            SerializationFormat::Json,
            CompressionKind::None,
            1024,
        ));
        let processor = BatchProcessor::new(
            config,
            backends,
            cache,
            pipeline,
            StatsRecorder::new(),
            MetricsManager::new(100),
        );

        let (op, rx) = set_op("k", Priority::Critical, 5);
        processor.enqueue(op).unwrap();
        let outcome = rx.await.unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("not configured"));
    }
}
