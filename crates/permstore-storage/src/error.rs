//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store connection error (transport failure, store unreachable).
    #[error("store connection error: {message}")]
    ConnectionError { message: String },

    /// Deadline passed before or while issuing a store call.
    #[error("request processing timeout after {timeout:?} for {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// Rename or read of a key that does not exist.
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    /// Set operation against a value key, or value operation against a set.
    #[error("wrong type for key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Malformed stored value.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Batch could not be applied; no command in it took effect.
    #[error("batch failed at command {index}: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<StorageError>,
    },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Whether a retry of the same call may succeed.
    ///
    /// Only transport failures are retried; timeouts, type errors and bad
    /// data fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::ConnectionError { .. } => true,
            StorageError::BatchFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout { .. })
    }
}

/// Health status of a store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: Duration,
    pub message: Option<String>,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
