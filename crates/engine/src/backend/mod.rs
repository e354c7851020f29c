//! Uniform CRUD contract over heterogeneous storage media.
//!
//! Every backend stores opaque byte payloads produced by the pipeline and
//! surfaces failures as [`strata_core::Error::Backend`] with its own name
//! attached, never partial success. The set of kinds is closed: each
//! variant maps to exactly one concrete constructor.

pub mod database;
pub mod file;
pub mod memory;
pub mod remote;
pub mod session;

pub use database::DatabaseBackend;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;
pub use session::SessionBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_core::Result;
use uuid::Uuid;

/// Closed set of backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
    Session,
    Database,
    Remote,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Memory,
        BackendKind::File,
        BackendKind::Session,
        BackendKind::Database,
        BackendKind::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Session => "session",
            BackendKind::Database => "database",
            BackendKind::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a backend health probe.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub available: bool,
    pub detail: String,
}

impl BackendHealth {
    pub fn available(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

/// Async storage backend abstraction.
///
/// Implementations vary only in medium; the error semantics are identical
/// across all of them.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable backend name used in errors and health reports.
    fn name(&self) -> &'static str;

    /// Retrieve a stored payload.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a payload, replacing any existing one.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, reporting whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check for a key without fetching its payload.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove every entry this backend owns.
    async fn clear(&self) -> Result<()>;

    /// Probe availability with a synthetic write/read/delete round-trip.
    async fn health_check(&self) -> BackendHealth {
        let key = format!("__strata_health_{}", Uuid::new_v4());
        let payload = b"health-probe".to_vec();

        if let Err(e) = self.set(&key, payload.clone(), Some(Duration::from_secs(60))).await {
            return BackendHealth::unavailable(format!("write probe failed: {e}"));
        }
        match self.get(&key).await {
            Ok(Some(read)) if read == payload => {}
            Ok(_) => {
                let _ = self.delete(&key).await;
                return BackendHealth::unavailable("read probe returned wrong payload");
            }
            Err(e) => {
                let _ = self.delete(&key).await;
                return BackendHealth::unavailable(format!("read probe failed: {e}"));
            }
        }
        if let Err(e) = self.delete(&key).await {
            return BackendHealth::unavailable(format!("delete probe failed: {e}"));
        }

        BackendHealth::available("round-trip probe succeeded")
    }
}

/// The backends an engine instance dispatches to, keyed by kind.
pub type BackendSet = HashMap<BackendKind, Arc<dyn StorageBackend>>;
