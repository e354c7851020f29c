//! Batched, priority-aware storage engine.
//!
//! The engine queues writes per priority, debounces them so bursts
//! coalesce into batches, and dispatches each batch to a pluggable
//! storage backend. Values travel through a serialization/compression
//! pipeline into a self-describing envelope, reads are served through a
//! hierarchical in-process cache, and background loops keep queues,
//! stats, and cache levels tidy.
//!
//! ```no_run
//! use strata_engine::{BackendKind, EngineBuilder, Priority};
//!
//! # async fn demo() -> strata_core::Result<()> {
//! let engine = EngineBuilder::new().memory().build()?;
//! engine.start();
//!
//! let pending = engine.set(
//!     BackendKind::Memory,
//!     "user:42",
//!     serde_json::json!({"name": "ada"}),
//!     Priority::Normal,
//! )?;
//! let outcome = pending.wait().await?;
//! assert!(outcome.succeeded);
//!
//! let value = engine.get(BackendKind::Memory, "user:42").await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod metrics;
pub mod operation;
pub mod pipeline;
pub mod stats;
pub mod tasks;

pub use backend::{
    BackendHealth, BackendKind, BackendSet, DatabaseBackend, FileBackend, MemoryBackend,
    RemoteBackend, SessionBackend, StorageBackend,
};
pub use batch::BatchProcessor;
pub use cache::{CacheLevelStats, EvictionPolicyKind, MultiLevelCache};
pub use config::{DebounceIntervals, StorageConfig};
pub use encryption::{EncryptionMetadata, Encryptor, NoopEncryptor};
pub use engine::{EngineBuilder, HealthReport, PendingOperation, StorageEngine};
pub use metrics::{AggregatedMetrics, MetricKind, MetricsManager};
pub use operation::{BatchResult, OperationOutcome, StorageOperation};
pub use pipeline::{CompressionKind, Pipeline, PipelineMetadata, SerializationFormat};
pub use stats::{StatsRecorder, StorageStats};
pub use tasks::BackgroundTasks;

pub use strata_core::{Error, OperationType, Priority, Result};
