//! The unit of work flowing through the batch processor.

use crate::backend::BackendKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use strata_core::{OperationType, Priority};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Terminal result of one queued operation, delivered over its completion
/// channel. Resolved exactly once.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub operation_id: Uuid,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Sending half of an operation's completion channel.
pub type CompletionSender = oneshot::Sender<OperationOutcome>;

/// Receiving half handed back to the caller on enqueue.
pub type CompletionReceiver = oneshot::Receiver<OperationOutcome>;

/// One unit of work: created by the orchestrator on every public call,
/// consumed by the batch processor once terminally resolved or retried
/// past its limit.
#[derive(Debug)]
pub struct StorageOperation {
    pub operation_id: Uuid,
    pub operation_type: OperationType,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub backend: BackendKind,
    pub priority: Priority,
    pub ttl: Option<Duration>,
    pub created_at: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub completion: Option<CompletionSender>,
    pub metadata: HashMap<String, String>,
}

impl StorageOperation {
    pub fn new(
        operation_type: OperationType,
        key: impl Into<String>,
        value: Option<serde_json::Value>,
        backend: BackendKind,
        priority: Priority,
        max_retries: u32,
    ) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        let op = Self {
            operation_id: Uuid::new_v4(),
            operation_type,
            key: key.into(),
            value,
            backend,
            priority,
            ttl: None,
            created_at: Instant::now(),
            retry_count: 0,
            max_retries,
            completion: Some(tx),
            metadata: HashMap::new(),
        };
        (op, rx)
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Age of this operation since it entered the system.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Resolve the completion channel. A dropped receiver is fine; the
    /// caller opted out of observing the outcome.
    pub fn resolve(&mut self, succeeded: bool, error: Option<String>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(OperationOutcome {
                operation_id: self.operation_id,
                succeeded,
                error,
            });
        }
    }
}

/// Per-operation error record inside a [`BatchResult`].
#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub operation_id: Uuid,
    pub key: String,
    pub error: String,
}

/// Aggregate of one processing round. Derived, never persisted.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
    pub failures: Vec<OperationFailure>,
}
