use std::time::Duration;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the storage engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backend-specific failure, wrapped with the backend name and key
    #[error("backend '{backend}' failed for key '{key}': {message}")]
    Backend {
        backend: String,
        key: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Could not reach a networked backend
    #[error("connection to '{endpoint}' failed: {message}")]
    Connection {
        endpoint: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation exceeded its time budget
    #[error("operation '{operation}' timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// A capacity limit was exceeded
    #[error("capacity exceeded: {current} of {max}")]
    Capacity { current: u64, max: u64 },

    /// The operation queue is at its configured limit
    #[error("operation queue is full: {current} of {max}")]
    QueueFull { current: usize, max: usize },

    /// A key or value was rejected before enqueue
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Serialization or deserialization failed
    #[error("serialization error ({format}): {message}")]
    Serialization {
        format: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The caller lacks permission for an operation
    #[error("permission denied for {operation}: {message}")]
    Permission { operation: String, message: String },

    /// An invalid tunable was supplied at construction time
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// An operation failed and its retry budget is exhausted
    #[error("retries exhausted after {retry_count} of {max_retries}: {last_error}")]
    RetryExhausted {
        retry_count: u32,
        max_retries: u32,
        last_error: String,
    },

    /// Stored bytes failed an integrity check
    #[error("integrity check failed for '{key}': expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },
}

impl Error {
    /// Construct a backend error without an underlying source
    pub fn backend(backend: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Construct a backend error from an underlying cause
    pub fn backend_with_source(
        backend: impl Into<String>,
        key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            key: key.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Construct a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Construct a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Construct a serialization error from an underlying cause
    pub fn serialization(
        format: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. } | Error::Connection { .. } | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_reports_sizes() {
        let err = Error::QueueFull {
            current: 1000,
            max: 1000,
        };
        assert_eq!(err.to_string(), "operation queue is full: 1000 of 1000");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::backend("memory", "k", "boom").is_transient());
        assert!(!Error::configuration("bad").is_transient());
        assert!(!Error::validation("key", "empty").is_transient());
    }

    #[test]
    fn backend_error_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::backend_with_source("file", "k", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
