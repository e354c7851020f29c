//! Local filesystem backend.
//!
//! One file per key under a base directory, named by the SHA-256 of the
//! key. Each file holds a bincode record carrying the original key (to
//! detect hash collisions) and an optional expiry. Writes go through a
//! temp file plus rename so readers never observe a torn record.

use super::StorageBackend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strata_core::{Error, Result};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    // Unix milliseconds, so sub-second TTLs keep their precision.
    expires_at_unix_ms: Option<u64>,
    value: Vec<u8>,
}

impl FileRecord {
    fn is_expired(&self) -> bool {
        let Some(expires_at) = self.expires_at_unix_ms else {
            return false;
        };
        now_unix_ms() >= expires_at
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Backend persisting each key to its own file.
#[derive(Debug)]
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Create the backend, ensuring the base directory exists.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            Error::backend_with_source("file", base_dir.display().to_string(), e)
        })?;
        Ok(Self { base_dir })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.base_dir.join(format!("{}.bin", hex::encode(digest)))
    }

    async fn read_record(&self, key: &str) -> Result<Option<FileRecord>> {
        let path = self.object_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::backend_with_source("file", key, e)),
        };

        let record: FileRecord = bincode::deserialize(&bytes)
            .map_err(|e| Error::backend_with_source("file", key, e))?;

        if record.key != key {
            // Hash collision with another key's file; treat as absent.
            return Ok(None);
        }
        if record.is_expired() {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8], key: &str) -> Result<()> {
        let tmp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::backend_with_source("file", key, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::backend_with_source("file", key, e))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_record(key).await?.map(|r| r.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at_unix_ms = ttl.map(|t| now_unix_ms().saturating_add(t.as_millis() as u64));
        let record = FileRecord {
            key: key.to_string(),
            expires_at_unix_ms,
            value,
        };
        let bytes =
            bincode::serialize(&record).map_err(|e| Error::backend_with_source("file", key, e))?;
        self.write_atomic(&self.object_path(key), &bytes, key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::backend_with_source("file", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_record(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| Error::backend_with_source("file", "*", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::backend_with_source("file", "*", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "bin") {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!("failed to remove {}: {e}", path.display());
                    }
                }
            }
        }
        Ok(())
    }
}
