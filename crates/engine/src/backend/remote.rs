//! Networked key-value backend over HTTP.
//!
//! Talks to a remote cache service exposing `GET/PUT/DELETE /kv/{key}`
//! (keys hex-encoded in the path) and `DELETE /kv` for clear. The engine
//! assumes nothing about the service beyond this surface; transport
//! failures map to `Connection`, service failures to `Backend`.

use super::StorageBackend;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use strata_core::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a remote key-value cache service.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Connection {
                endpoint: base_url.clone(),
                message: format!("failed to build http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { client, base_url })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, hex::encode(key.as_bytes()))
    }

    fn connection_error(&self, e: reqwest::Error) -> Error {
        Error::Connection {
            endpoint: self.base_url.clone(),
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }

    fn status_error(&self, key: &str, status: StatusCode) -> Error {
        Error::backend(
            "remote",
            key,
            format!("service returned unexpected status {status}"),
        )
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.key_url(key))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await.map_err(|e| self.connection_error(e))?;
                Ok(Some(bytes.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(self.status_error(key, status)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut request = self.client.put(self.key_url(key)).body(value);
        if let Some(ttl) = ttl {
            request = request.query(&[("ttl", ttl.as_secs())]);
        }
        let response = request.send().await.map_err(|e| self.connection_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(key, response.status()))
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.key_url(key))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(self.status_error(key, status)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.key_url(key))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(self.status_error(key, status)),
        }
    }

    async fn clear(&self) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/kv", self.base_url))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error("*", response.status()))
        }
    }
}
