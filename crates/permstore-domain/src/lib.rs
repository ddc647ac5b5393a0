//! permstore-domain: Permission data model
//!
//! This crate contains the data handled by the permission repository:
//! - Resource types and the per-user `UserPermission` set
//! - The resource codec used to store per-type resource maps
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              permstore-domain                │
//! ├─────────────────────────────────────────────┤
//! │  model/   - Resources & UserPermission      │
//! │  codec.rs - JSON + gzip resource codec      │
//! │  error.rs - Domain errors                   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod error;
pub mod model;

// Re-export commonly used types at the crate root
pub use codec::{CompressedJsonCodec, ResourceCodec};
pub use error::{DomainError, DomainResult};
pub use model::{
    Account, Application, Authorization, BuildService, Resource, ResourceMap, ResourceType, Role,
    RoleSource, ServiceAccount, UserPermission, UNRESTRICTED_USERNAME,
};
