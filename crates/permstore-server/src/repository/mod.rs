//! Permission repository.
//!
//! [`PermissionsRepository`] is the contract callers program against;
//! [`StorePermissionsRepository`] implements it on any [`KeyValueStore`].
//!
//! # Error contract
//!
//! Reads (`get`, `get_all_by_id`, `get_all_by_roles`) may fail and callers
//! must handle the error. Writes (`put`, `put_all_by_id`, `remove`) log
//! every failure and also return it; callers that treat writes as
//! fire-and-forget may ignore the result.
//!
//! # Layout
//!
//! ```text
//! schema.rs       - key layout
//! write.rs        - put / put_all_by_id / remove batches
//! read.rs         - single-user read path
//! unrestricted.rs - marker-keyed cache for the unrestricted user
//! bulk.rs         - role fan-out queries
//! ```

mod bulk;
mod read;
pub mod schema;
pub mod singleflight;
pub mod unrestricted;
mod write;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use permstore_domain::{CompressedJsonCodec, ResourceCodec, Role, UserPermission};
use permstore_storage::{
    Clock, HealthStatus, KeyValueStore, MemoryKeyValueStore, RetryingClient, SystemClock,
    TimeoutContext,
};
use tracing::{error, instrument};

use crate::config::{ConfigLoadError, RepositorySettings, ServerConfig};
use crate::error::{RepositoryError, RepositoryResult};
use crate::observability::{READ_FAILURES, WRITE_FAILURES};

pub use schema::KeySchema;
pub use unrestricted::{UnrestrictedCache, UNKNOWN_LAST_MODIFIED};
pub use write::build_put_batch;

/// Storage and retrieval of per-user permissions.
#[async_trait]
pub trait PermissionsRepository: Send + Sync {
    /// Replaces everything stored for `permission.id`.
    async fn put(&self, permission: &UserPermission) -> RepositoryResult<()>;

    /// `put` for each entry in turn. Entries are independent: every entry
    /// is attempted and the first failure is returned.
    async fn put_all_by_id(
        &self,
        permissions: &HashMap<String, UserPermission>,
    ) -> RepositoryResult<()>;

    /// The stored permission merged with the unrestricted user's resources,
    /// or `None` if `id` was never stored. The unrestricted user itself is
    /// always found, with no resources if nothing was stored for it.
    async fn get(&self, id: &str) -> RepositoryResult<Option<UserPermission>>;

    /// Stored roles of every stored user, without the unrestricted merge.
    async fn get_all_by_id(&self) -> RepositoryResult<HashMap<String, BTreeSet<Role>>>;

    /// Roles of every user holding any of `role_names`, plus the unrestricted user.
    ///
    /// `None` behaves as [`get_all_by_id`](Self::get_all_by_id); an empty
    /// slice returns only the unrestricted user.
    async fn get_all_by_roles(
        &self,
        role_names: Option<&[String]>,
    ) -> RepositoryResult<HashMap<String, BTreeSet<Role>>>;

    /// Deletes everything stored for `id`. Removing an absent id is a no-op.
    async fn remove(&self, id: &str) -> RepositoryResult<()>;
}

/// [`PermissionsRepository`] backed by a [`KeyValueStore`].
pub struct StorePermissionsRepository<S: KeyValueStore> {
    client: RetryingClient<S>,
    schema: KeySchema,
    codec: Arc<dyn ResourceCodec>,
    clock: Arc<dyn Clock>,
    unrestricted: UnrestrictedCache,
    timeouts: RepositorySettings,
    max_concurrency: usize,
}

impl<S: KeyValueStore> StorePermissionsRepository<S> {
    pub fn new(store: Arc<S>, config: &ServerConfig) -> Self {
        Self {
            client: RetryingClient::new(store, config.retry.policy(), config.storage.pool_size),
            schema: KeySchema::new(config.storage.prefix.clone()),
            codec: Arc::new(CompressedJsonCodec::new()),
            clock: Arc::new(SystemClock),
            unrestricted: UnrestrictedCache::new(&config.unrestricted_cache),
            timeouts: config.repository.clone(),
            max_concurrency: config.bulk.max_concurrency.max(1),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ResourceCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Clock used for operation deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        self.client.store()
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    pub fn unrestricted_cache(&self) -> &UnrestrictedCache {
        &self.unrestricted
    }

    pub async fn health_check(&self) -> RepositoryResult<HealthStatus> {
        Ok(self.client.store().health_check().await?)
    }

    pub(crate) fn context(&self, name: impl Into<String>, timeout: Duration) -> TimeoutContext {
        TimeoutContext::new(name, Arc::clone(&self.clock), timeout)
    }

    fn get_permission_context(&self, id: &str) -> TimeoutContext {
        self.context(
            format!("getPermission for user: {id}"),
            self.timeouts.get_permission_timeout(),
        )
    }
}

impl StorePermissionsRepository<MemoryKeyValueStore> {
    /// Builds a validated repository over the backend named in `config`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigLoadError> {
        config.validate()?;
        match config.storage.backend.as_str() {
            "memory" => Ok(Self::new(MemoryKeyValueStore::new_shared(), config)),
            other => Err(ConfigLoadError::Invalid {
                message: format!("unsupported storage.backend: {other}"),
            }),
        }
    }
}

fn record_read_failure(operation: &'static str, id: &str, err: &RepositoryError) {
    error!(operation, user = id, error = %err, "permission read failed");
    metrics::counter!(READ_FAILURES, "operation" => operation).increment(1);
}

fn record_write_failure(operation: &'static str, id: &str, err: &RepositoryError) {
    error!(operation, user = id, error = %err, "storage exception writing entry");
    metrics::counter!(WRITE_FAILURES, "operation" => operation).increment(1);
}

#[async_trait]
impl<S: KeyValueStore> PermissionsRepository for StorePermissionsRepository<S> {
    #[instrument(skip(self, permission), fields(user = %permission.id))]
    async fn put(&self, permission: &UserPermission) -> RepositoryResult<()> {
        self.write_permission(permission).await.map_err(|e| {
            let e = e.write_failed(&permission.id);
            record_write_failure("put", &permission.id, &e);
            e
        })
    }

    #[instrument(skip(self, permissions), fields(count = permissions.len()))]
    async fn put_all_by_id(
        &self,
        permissions: &HashMap<String, UserPermission>,
    ) -> RepositoryResult<()> {
        let mut first_error = None;
        for permission in permissions.values() {
            if let Err(e) = self.put(permission).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> RepositoryResult<Option<UserPermission>> {
        self.read_permission(id).await.map_err(|e| {
            let e = e.read_failed(id);
            record_read_failure("get", id, &e);
            e
        })
    }

    #[instrument(skip(self))]
    async fn get_all_by_id(&self) -> RepositoryResult<HashMap<String, BTreeSet<Role>>> {
        self.all_roles_by_id().await.map_err(|e| {
            record_read_failure("get_all_by_id", "*", &e);
            e
        })
    }

    #[instrument(skip(self))]
    async fn get_all_by_roles(
        &self,
        role_names: Option<&[String]>,
    ) -> RepositoryResult<HashMap<String, BTreeSet<Role>>> {
        let result = match role_names {
            None => self.all_roles_by_id().await,
            Some(role_names) => self.roles_by_any_role(role_names).await,
        };
        result.map_err(|e| {
            record_read_failure("get_all_by_roles", "*", &e);
            e
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> RepositoryResult<()> {
        self.remove_permission(id).await.map_err(|e| {
            let e = e.write_failed(id);
            record_write_failure("remove", id, &e);
            e
        })
    }
}
