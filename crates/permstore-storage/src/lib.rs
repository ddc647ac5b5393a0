//! permstore-storage: Key-value store layer
//!
//! This crate provides the store abstraction the permission repository is
//! built on, including:
//! - KeyValueStore trait with atomic command batches
//! - In-memory implementation for testing and local runs
//! - Per-operation deadlines and a retrying, pool-bounded client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              permstore-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs  - KeyValueStore, Batch, Reply   │
//! │  memory.rs  - In-memory implementation      │
//! │  timeout.rs - Clock + TimeoutContext        │
//! │  retry.rs   - RetryPolicy / backoff         │
//! │  client.rs  - RetryingClient                │
//! └─────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod retry;
pub mod timeout;
pub mod traits;

// Re-export commonly used types
pub use client::{RetryingClient, STORE_READ_DURATION, STORE_TIMEOUTS};
pub use error::{HealthStatus, StorageError, StorageResult};
pub use memory::MemoryKeyValueStore;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use timeout::{Clock, ManualClock, SystemClock, TimeoutContext};
pub use traits::{time_reply, Batch, Command, KeyValueStore, Reply, ServerTime};
