//! Session-scoped in-memory backend.
//!
//! Holds entries for a single logical session. A default TTL is applied
//! to writes that do not carry one, and `clear` drops only this session's
//! scope, never anyone else's.

use super::{BackendHealth, StorageBackend};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use strata_core::Result;

#[derive(Debug, Clone)]
struct SessionEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl SessionEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Backend scoped to one session identifier.
#[derive(Debug)]
pub struct SessionBackend {
    session_id: String,
    default_ttl: Option<Duration>,
    entries: DashMap<String, SessionEntry>,
}

impl SessionBackend {
    pub fn new(session_id: impl Into<String>, default_ttl: Option<Duration>) -> Self {
        Self {
            session_id: session_id.into(),
            default_ttl,
            entries: DashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl StorageBackend for SessionBackend {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let effective_ttl = ttl.or(self.default_ttl);
        self.entries.insert(
            key.to_string(),
            SessionEntry {
                value,
                expires_at: effective_ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn health_check(&self) -> BackendHealth {
        BackendHealth::available(format!(
            "session '{}', {} entries",
            self.session_id,
            self.entries.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_ttl_applies_when_unset() {
        let backend = SessionBackend::new("s1", Some(Duration::ZERO));
        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);

        // An explicit TTL overrides the default.
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn clear_is_scoped_to_one_session() {
        let a = SessionBackend::new("a", None);
        let b = SessionBackend::new("b", None);
        a.set("k", b"1".to_vec(), None).await.unwrap();
        b.set("k", b"2".to_vec(), None).await.unwrap();

        a.clear().await.unwrap();
        assert_eq!(a.get("k").await.unwrap(), None);
        assert_eq!(b.get("k").await.unwrap(), Some(b"2".to_vec()));
    }
}
