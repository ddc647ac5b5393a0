//! Domain error types for permission data.

use thiserror::Error;

use crate::model::ResourceType;

/// Domain-specific errors for permission data handling.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Error serializing resources for storage.
    #[error("serialization error for {resource_type} resources: {message}")]
    Serialization {
        resource_type: ResourceType,
        message: String,
    },

    /// Stored bytes could not be decoded (corrupt or incompatible blob).
    #[error("deserialization error for {resource_type} resources: {message}")]
    Deserialization {
        resource_type: ResourceType,
        message: String,
    },

    /// A decoded resource does not belong to the requested type.
    #[error("resource '{name}' has type {actual}, expected {expected}")]
    ResourceTypeMismatch {
        name: String,
        expected: ResourceType,
        actual: ResourceType,
    },

    /// Unknown resource type name.
    #[error("unknown resource type: {value}")]
    UnknownResourceType { value: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
