//! Repository error types.

use std::time::Duration;

use permstore_domain::DomainError;
use permstore_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the permission repository.
///
/// `Clone` so one failed single-flight load can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// Deadline exceeded before or while issuing a store call.
    #[error("request processing timeout after {timeout:?} for {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// Transport or connection failure (retried before surfacing).
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Corrupt or incompatible stored data. Never retried.
    #[error("corrupt permission data: {message}")]
    Deserialization { message: String },

    /// Resources could not be encoded for storage. Nothing was written.
    #[error("permission data could not be encoded: {message}")]
    Encoding { message: String },

    #[error("permission read failed for {id}: {source}")]
    PermissionRead {
        id: String,
        #[source]
        source: Box<RepositoryError>,
    },

    #[error("permission write failed for {id}: {source}")]
    PermissionWrite {
        id: String,
        #[source]
        source: Box<RepositoryError>,
    },
}

impl RepositoryError {
    /// Wraps as a read failure for `id`, unless already wrapped.
    pub fn read_failed(self, id: &str) -> Self {
        match self {
            e @ RepositoryError::PermissionRead { .. } => e,
            e => RepositoryError::PermissionRead {
                id: id.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// Wraps as a write failure for `id`, unless already wrapped.
    pub fn write_failed(self, id: &str) -> Self {
        match self {
            e @ RepositoryError::PermissionWrite { .. } => e,
            e => RepositoryError::PermissionWrite {
                id: id.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// The innermost error, past any read/write wrapping.
    pub fn root(&self) -> &RepositoryError {
        match self {
            RepositoryError::PermissionRead { source, .. }
            | RepositoryError::PermissionWrite { source, .. } => source.root(),
            e => e,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), RepositoryError::Timeout { .. })
    }
}

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout { operation, timeout } => {
                RepositoryError::Timeout { operation, timeout }
            }
            StorageError::BatchFailed { source, .. } => RepositoryError::from(*source),
            e @ (StorageError::SerializationError { .. } | StorageError::WrongType { .. }) => {
                RepositoryError::Deserialization {
                    message: e.to_string(),
                }
            }
            e => RepositoryError::StoreUnavailable {
                message: e.to_string(),
            },
        }
    }
}

impl From<DomainError> for RepositoryError {
    fn from(err: DomainError) -> Self {
        match err {
            e @ DomainError::Serialization { .. } => RepositoryError::Encoding {
                message: e.to_string(),
            },
            e => RepositoryError::Deserialization {
                message: e.to_string(),
            },
        }
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
