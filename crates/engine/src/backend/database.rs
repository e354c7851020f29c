//! Relational backend over SQLite.
//!
//! A single `kv` table keyed by the storage key. WAL journal mode keeps
//! concurrent readers off the writer's back. Expiry is stored as a unix
//! millisecond timestamp and enforced lazily on read.

use super::StorageBackend;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strata_core::{Error, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    expires_at INTEGER
)";

/// Backend persisting entries to a SQLite database file.
#[derive(Debug, Clone)]
pub struct DatabaseBackend {
    pool: SqlitePool,
}

impl DatabaseBackend {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options, 4).await
    }

    /// In-memory database, used by tests. A single connection: every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::backend_with_source("database", "<connect>", e))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend_with_source("database", "<schema>", e))?;

        Ok(Self { pool })
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

#[async_trait]
impl StorageBackend for DatabaseBackend {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend_with_source("database", key, e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<i64> = row.get("expires_at");
        if expires_at.is_some_and(|at| at <= Self::now_unix_ms()) {
            sqlx::query("DELETE FROM kv WHERE key = ?1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::backend_with_source("database", key, e))?;
            return Ok(None);
        }

        Ok(Some(row.get("value")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| Self::now_unix_ms().saturating_add(t.as_millis() as i64));
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend_with_source("database", key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend_with_source("database", key, e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT expires_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend_with_source("database", key, e))?;

        match row {
            Some(row) => {
                let expires_at: Option<i64> = row.get("expires_at");
                Ok(!expires_at.is_some_and(|at| at <= Self::now_unix_ms()))
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM kv")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend_with_source("database", "*", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_against_sqlite() {
        let backend = DatabaseBackend::in_memory().await.unwrap();

        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(backend.exists("k").await.unwrap());
        assert!(backend.delete("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_overwrites() {
        let backend = DatabaseBackend::in_memory().await.unwrap();
        backend.set("k", b"one".to_vec(), None).await.unwrap();
        backend.set("k", b"two".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn expired_rows_are_purged_on_read() {
        let backend = DatabaseBackend::in_memory().await.unwrap();
        backend
            .set("k", b"v".to_vec(), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn subsecond_ttl_keeps_its_precision() {
        let backend = DatabaseBackend::in_memory().await.unwrap();

        backend
            .set("k", b"v".to_vec(), Some(Duration::from_millis(900)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

        backend
            .set("gone", b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!backend.exists("gone").await.unwrap());
    }

    #[tokio::test]
    async fn clear_truncates_the_table() {
        let backend = DatabaseBackend::in_memory().await.unwrap();
        for i in 0..3 {
            backend
                .set(&format!("k{i}"), vec![i as u8], None)
                .await
                .unwrap();
        }
        backend.clear().await.unwrap();
        assert!(!backend.exists("k0").await.unwrap());
    }

    #[tokio::test]
    async fn default_health_check_passes() {
        let backend = DatabaseBackend::in_memory().await.unwrap();
        let health = backend.health_check().await;
        assert!(health.available, "{}", health.detail);
    }
}
