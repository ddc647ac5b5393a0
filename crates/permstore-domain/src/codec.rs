//! Resource codec: per-type resource maps to compressed bytes and back.
//!
//! The stored form of one resource type for one user is the JSON object
//! `{ name: resource }`, gzip-compressed.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{DomainError, DomainResult};
use crate::model::{ResourceMap, ResourceType};

/// Serializes and compresses resource maps for storage.
///
/// `decode(encode(m), t)` must return `m` for any map whose resources are
/// all of type `t`.
pub trait ResourceCodec: Send + Sync {
    fn encode(&self, resource_type: ResourceType, resources: &ResourceMap) -> DomainResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8], resource_type: ResourceType) -> DomainResult<ResourceMap>;
}

/// JSON + gzip codec.
#[derive(Debug, Clone)]
pub struct CompressedJsonCodec {
    level: Compression,
}

impl Default for CompressedJsonCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl CompressedJsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gzip level (0-9).
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }
}

impl ResourceCodec for CompressedJsonCodec {
    fn encode(&self, resource_type: ResourceType, resources: &ResourceMap) -> DomainResult<Vec<u8>> {
        let serialization = |message: String| DomainError::Serialization {
            resource_type,
            message,
        };

        for (name, resource) in resources {
            if resource.resource_type() != resource_type {
                return Err(DomainError::ResourceTypeMismatch {
                    name: name.clone(),
                    expected: resource_type,
                    actual: resource.resource_type(),
                });
            }
        }

        let json = serde_json::to_vec(resources).map_err(|e| serialization(e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(&json)
            .map_err(|e| serialization(e.to_string()))?;
        encoder.finish().map_err(|e| serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8], resource_type: ResourceType) -> DomainResult<ResourceMap> {
        let deserialization = |message: String| DomainError::Deserialization {
            resource_type,
            message,
        };

        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| deserialization(e.to_string()))?;

        let resources: ResourceMap =
            serde_json::from_slice(&json).map_err(|e| deserialization(e.to_string()))?;

        for (name, resource) in &resources {
            if resource.resource_type() != resource_type {
                return Err(DomainError::ResourceTypeMismatch {
                    name: name.clone(),
                    expected: resource_type,
                    actual: resource.resource_type(),
                });
            }
            if resource.name() != name {
                return Err(deserialization(format!(
                    "entry '{}' holds resource named '{}'",
                    name,
                    resource.name()
                )));
            }
        }

        Ok(resources)
    }
}
