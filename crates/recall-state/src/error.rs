//! Error types for recall-state

use thiserror::Error;

/// Errors that can occur in the memory/checkpoint persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend unreachable, connection refused or timed out
    #[error("Backend connection failed: {0}")]
    Connection(String),

    /// Backend accepted the connection but rejected the command
    #[error("Backend command failed: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Caller-supplied argument the key layout cannot hold
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be parsed
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Backend deliberately switched offline (in-memory fake)
    #[error("Backend unavailable")]
    Unavailable,
}

impl StorageError {
    /// Whether the error means the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Unavailable)
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
            StorageError::Connection(err.to_string())
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StorageError::Unavailable.is_connectivity());
        assert!(StorageError::Connection("refused".into()).is_connectivity());
        assert!(!StorageError::Backend("WRONGTYPE".into()).is_connectivity());
    }

    #[test]
    fn test_invalid_config_message() {
        let err = StorageError::InvalidConfig {
            field: "RECALL_REDIS_PORT".into(),
            reason: "not a number".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for RECALL_REDIS_PORT: not a number"
        );
    }
}
