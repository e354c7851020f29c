//! The storage engine façade.
//!
//! Owns the backend set, the cache hierarchy, the pipeline, the batch
//! processor, and the background loops. Writes are queued and debounced;
//! reads go straight through the cache to the backend. Construction is
//! fail-fast: an invalid configuration or an empty backend set never
//! yields a partially working engine.

use crate::backend::{BackendHealth, BackendKind, BackendSet, MemoryBackend, StorageBackend};
use crate::batch::BatchProcessor;
use crate::cache::{CacheLevelStats, MultiLevelCache};
use crate::config::StorageConfig;
use crate::encryption::Encryptor;
use crate::metrics::MetricsManager;
use crate::operation::{CompletionReceiver, OperationOutcome, StorageOperation};
use crate::pipeline::Pipeline;
use crate::stats::{StatsRecorder, StorageStats};
use crate::tasks::BackgroundTasks;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{validate_key, validate_value, Error, OperationType, Priority, Result};
use uuid::Uuid;

/// Handle to a queued write. The outcome arrives over the completion
/// channel once the operation terminally succeeds or fails.
pub struct PendingOperation {
    pub operation_id: Uuid,
    receiver: CompletionReceiver,
}

impl PendingOperation {
    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<OperationOutcome> {
        self.receiver.await.map_err(|_| {
            Error::configuration("operation was cancelled before completion")
        })
    }
}

/// Aggregated availability across the engine's components.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub backends: HashMap<BackendKind, BackendHealth>,
    pub cache_available: bool,
    pub queue_length: usize,
    pub accepting_operations: bool,
}

impl HealthReport {
    /// True when every backend and the cache passed their probes.
    pub fn healthy(&self) -> bool {
        self.accepting_operations
            && self.cache_available
            && self.backends.values().all(|h| h.available)
    }
}

/// Builder for [`StorageEngine`]. Backends must be registered
/// explicitly; nothing is implied.
pub struct EngineBuilder {
    config: StorageConfig,
    backends: BackendSet,
    encryptor: Option<Arc<dyn Encryptor>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: StorageConfig::default(),
            backends: HashMap::new(),
            encryptor: None,
        }
    }

    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, kind: BackendKind, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Register the in-process memory backend.
    pub fn memory(self) -> Self {
        self.backend(BackendKind::Memory, Arc::new(MemoryBackend::new()))
    }

    /// Swap the pipeline's no-op encryptor for a real one.
    pub fn encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn build(self) -> Result<StorageEngine> {
        StorageEngine::with_encryptor(self.config, self.backends, self.encryptor)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The orchestrator over queues, cache, pipeline, and backends.
pub struct StorageEngine {
    config: StorageConfig,
    backends: BackendSet,
    cache: Arc<MultiLevelCache>,
    pipeline: Arc<Pipeline>,
    processor: BatchProcessor,
    stats: StatsRecorder,
    metrics: MetricsManager,
    tasks: Mutex<Option<BackgroundTasks>>,
    accepting: AtomicBool,
}

impl StorageEngine {
    /// Validate the configuration and wire the components together.
    pub fn new(config: StorageConfig, backends: BackendSet) -> Result<Self> {
        Self::with_encryptor(config, backends, None)
    }

    fn with_encryptor(
        config: StorageConfig,
        backends: BackendSet,
        encryptor: Option<Arc<dyn Encryptor>>,
    ) -> Result<Self> {
        config.validate()?;
        if backends.is_empty() {
            return Err(Error::configuration(
                "at least one backend must be registered",
            ));
        }

        let cache = Arc::new(MultiLevelCache::new(
            config.memory_max_size,
            config.memory_default_ttl,
            config.eviction_policy,
        ));
        let mut pipeline = Pipeline::new(
            config.serialization_format,
            config.compression,
            config.compression_threshold,
        );
        if let Some(encryptor) = encryptor {
            pipeline = pipeline.with_encryptor(encryptor);
        }
        let pipeline = Arc::new(pipeline);
        let stats = StatsRecorder::new();
        let metrics = MetricsManager::new(config.metrics_retention_points);
        let processor = BatchProcessor::new(
            config.clone(),
            backends.clone(),
            cache.clone(),
            pipeline.clone(),
            stats.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            backends,
            cache,
            pipeline,
            processor,
            stats,
            metrics,
            tasks: Mutex::new(None),
            accepting: AtomicBool::new(true),
        })
    }

    /// Start the background maintenance loops. Idempotent.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_none() {
            *tasks = Some(BackgroundTasks::start(
                &self.config,
                self.processor.clone(),
                self.cache.clone(),
                self.stats.clone(),
                self.metrics.clone(),
            ));
            tracing::info!(
                backends = self.backends.len(),
                "storage engine started"
            );
        }
    }

    /// Queue a write with the default retry budget.
    pub fn set(
        &self,
        backend: BackendKind,
        key: &str,
        value: serde_json::Value,
        priority: Priority,
    ) -> Result<PendingOperation> {
        self.set_with_ttl(backend, key, value, priority, None)
    }

    /// Queue a write carrying an explicit TTL.
    pub fn set_with_ttl(
        &self,
        backend: BackendKind,
        key: &str,
        value: serde_json::Value,
        priority: Priority,
        ttl: Option<Duration>,
    ) -> Result<PendingOperation> {
        self.ensure_accepting()?;
        validate_key(key)?;
        validate_value(&value)?;

        let (op, receiver) = StorageOperation::new(
            OperationType::Set,
            key,
            Some(value),
            backend,
            priority,
            self.config.default_max_retries,
        );
        let op = op.with_ttl(ttl);
        self.submit(op, receiver)
    }

    /// Queue a delete.
    pub fn delete(
        &self,
        backend: BackendKind,
        key: &str,
        priority: Priority,
    ) -> Result<PendingOperation> {
        self.ensure_accepting()?;
        validate_key(key)?;

        let (op, receiver) = StorageOperation::new(
            OperationType::Delete,
            key,
            None,
            backend,
            priority,
            self.config.default_max_retries,
        );
        self.submit(op, receiver)
    }

    /// Queue a clear of everything one backend owns.
    pub fn clear(&self, backend: BackendKind, priority: Priority) -> Result<PendingOperation> {
        self.ensure_accepting()?;

        let (op, receiver) = StorageOperation::new(
            OperationType::Clear,
            "*",
            None,
            backend,
            priority,
            self.config.default_max_retries,
        );
        self.submit(op, receiver)
    }

    fn submit(
        &self,
        op: StorageOperation,
        receiver: CompletionReceiver,
    ) -> Result<PendingOperation> {
        let operation_id = op.operation_id;
        self.stats.record_operation();
        self.processor.enqueue(op)?;
        Ok(PendingOperation {
            operation_id,
            receiver,
        })
    }

    /// Read a value, consulting the cache first and populating it on a
    /// backend hit.
    pub async fn get(&self, backend: BackendKind, key: &str) -> Result<Option<serde_json::Value>> {
        self.ensure_accepting()?;
        validate_key(key)?;
        self.stats.record_operation();

        let cache_key = cache_key(backend, key);
        if let Some(value) = self.cache.get(&cache_key) {
            self.stats.record_cache_hit();
            return Ok(Some(value));
        }
        self.stats.record_cache_miss();

        let store = self.backend(backend)?;
        match store.get(key).await {
            Ok(Some(bytes)) => {
                let value = self.pipeline.decode_value(key, &bytes)?;
                self.cache
                    .set(cache_key, value.clone(), None, Priority::Normal);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    /// Check for a key. A cached entry counts as existing without
    /// touching the backend.
    pub async fn exists(&self, backend: BackendKind, key: &str) -> Result<bool> {
        self.ensure_accepting()?;
        validate_key(key)?;
        self.stats.record_operation();

        if self.cache.get(&cache_key(backend, key)).is_some() {
            self.stats.record_cache_hit();
            return Ok(true);
        }
        self.stats.record_cache_miss();
        match self.backend(backend)?.exists(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    /// Probe every backend in parallel, plus the cache.
    pub async fn health_check(&self) -> HealthReport {
        let probes = self.backends.iter().map(|(kind, backend)| async move {
            (*kind, backend.health_check().await)
        });
        let backends: HashMap<BackendKind, BackendHealth> =
            futures::future::join_all(probes).await.into_iter().collect();

        let probe_key = format!("__strata_health_{}", Uuid::new_v4());
        self.cache
            .set(probe_key.clone(), serde_json::json!(true), None, Priority::Low);
        let cache_available = self.cache.get(&probe_key).is_some();
        self.cache.remove(&probe_key);

        HealthReport {
            backends,
            cache_available,
            queue_length: self.processor.queue_length(),
            accepting_operations: self.accepting.load(Ordering::SeqCst),
        }
    }

    /// Snapshot the engine counters.
    pub fn stats(&self) -> StorageStats {
        self.stats.snapshot(self.processor.queue_length())
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Per-level cache statistics.
    pub fn cache_stats(&self) -> Vec<CacheLevelStats> {
        self.cache.stats()
    }

    pub fn metrics(&self) -> &MetricsManager {
        &self.metrics
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Stop accepting operations, flush every queue, then stop the
    /// background loops and cancel pending retries.
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!(
                queued = self.processor.queue_length(),
                "storage engine shutting down"
            );
        }
        self.processor.drain().await;
        if let Some(mut tasks) = self.tasks.lock().take() {
            tasks.stop();
        }
        self.processor.stop();
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::configuration("engine is shut down"))
        }
    }

    fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn StorageBackend>> {
        self.backends.get(&kind).ok_or_else(|| {
            Error::configuration(format!("no {kind} backend is registered"))
        })
    }
}

fn cache_key(backend: BackendKind, key: &str) -> String {
    format!("{backend}:{key}")
}
