//! Shared value enums and request validation.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum accepted key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum accepted nesting depth for structured values
pub const MAX_VALUE_DEPTH: usize = 64;

/// Urgency class of a queued operation.
///
/// Governs the debounce delay applied before a batch for that class is
/// dispatched. `Critical` is never delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All priorities, most urgent first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a storage operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Set,
    Get,
    Delete,
    Exists,
    Clear,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Set => "set",
            OperationType::Get => "get",
            OperationType::Delete => "delete",
            OperationType::Exists => "exists",
            OperationType::Clear => "clear",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a storage key before it is accepted into the queue.
///
/// Keys must be non-empty, at most [`MAX_KEY_LENGTH`] bytes, and free of
/// interior NUL bytes (which break file-based backends).
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation("key", "key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::validation(
            "key",
            format!("key length {} exceeds maximum {MAX_KEY_LENGTH}", key.len()),
        ));
    }
    if key.contains('\0') {
        return Err(Error::validation("key", "key must not contain NUL bytes"));
    }
    Ok(())
}

/// Validate a value before it is accepted into the queue.
///
/// Values are structured JSON trees; pathological nesting is rejected up
/// front so the serialization pipeline cannot blow the stack later.
pub fn validate_value(value: &serde_json::Value) -> Result<()> {
    fn depth(value: &serde_json::Value) -> usize {
        match value {
            serde_json::Value::Array(items) => {
                1 + items.iter().map(depth).max().unwrap_or(0)
            }
            serde_json::Value::Object(map) => {
                1 + map.values().map(depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }

    if depth(value) > MAX_VALUE_DEPTH {
        return Err(Error::validation(
            "value",
            format!("value nesting exceeds maximum depth {MAX_VALUE_DEPTH}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_ordering_most_urgent_first() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::ALL[0], Priority::Critical);
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("a").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH + 1)).is_err());
        assert!(validate_key("bad\0key").is_err());
    }

    #[test]
    fn value_validation_accepts_ordinary_trees() {
        assert!(validate_value(&json!({"a": [1, 2, {"b": "c"}]})).is_ok());
        assert!(validate_value(&json!(null)).is_ok());
    }

    #[test]
    fn value_validation_rejects_deep_nesting() {
        let mut value = json!(1);
        for _ in 0..(MAX_VALUE_DEPTH + 1) {
            value = json!([value]);
        }
        assert!(validate_value(&value).is_err());
    }
}
