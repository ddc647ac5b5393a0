//! permstore-server: Permission repository
//!
//! This crate contains the repository layer including:
//! - Put / get / remove of per-user permissions on a key-value store
//! - Role fan-out queries
//! - Marker-keyed caching of the unrestricted user's permission
//! - Configuration, logging and metrics setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              permstore-server                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs        - Configuration loading    │
//! │  error.rs         - Repository errors        │
//! │  observability.rs - Logging and metrics      │
//! │  repository/      - PermissionsRepository    │
//! │    write.rs        - Atomic put / remove     │
//! │    read.rs         - Single-user reads       │
//! │    bulk.rs         - Role fan-out            │
//! │    unrestricted.rs - Unrestricted cache      │
//! │    singleflight.rs - Load deduplication      │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod repository;

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};
pub use error::{RepositoryError, RepositoryResult};
pub use repository::{PermissionsRepository, StorePermissionsRepository};
