//! Role fan-out queries over many users.
//!
//! Both queries report each user's stored roles only; the unrestricted
//! user's roles are not merged in. Any failed role read fails the whole
//! query.

use std::collections::{BTreeSet, HashMap, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};
use permstore_domain::{ResourceType, Role, UserPermission, UNRESTRICTED_USERNAME};
use permstore_storage::KeyValueStore;
use tracing::{debug, warn};

use super::StorePermissionsRepository;
use crate::error::{RepositoryError, RepositoryResult};

type RolesById = HashMap<String, BTreeSet<Role>>;

impl<S: KeyValueStore> StorePermissionsRepository<S> {
    pub(super) async fn all_roles_by_id(&self) -> RepositoryResult<RolesById> {
        let ctx = self.context("getAllById", self.timeouts.get_permission_timeout());
        let ids = self.read_members(&ctx, self.schema.all_users_key()).await?;
        self.resolve_roles(ids).await
    }

    /// Users holding any of `role_names`, always including the unrestricted user.
    pub(super) async fn roles_by_any_role(
        &self,
        role_names: &[String],
    ) -> RepositoryResult<RolesById> {
        let unique: BTreeSet<String> = role_names.iter().cloned().collect();

        let member_sets: Vec<HashSet<String>> = stream::iter(unique)
            .map(|role| async move {
                let ctx = self.context(
                    format!("getAllByRoles for role: {role}"),
                    self.timeouts.get_permission_timeout(),
                );
                match self.read_members(&ctx, self.schema.role_key(&role)).await {
                    Ok(members) => Some(members),
                    Err(e) => {
                        warn!(role = %role, error = %e, "skipping role after failed member read");
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .filter_map(|members| async move { members })
            .collect()
            .await;

        let mut ids: HashSet<String> = member_sets.into_iter().flatten().collect();
        ids.insert(UNRESTRICTED_USERNAME.to_string());
        debug!(roles = role_names.len(), users = ids.len(), "resolved role members");
        self.resolve_roles(ids).await
    }

    /// Stored roles of each id; an id with no stored roles maps to an empty set.
    async fn resolve_roles(&self, ids: HashSet<String>) -> RepositoryResult<RolesById> {
        stream::iter(ids)
            .map(|id| async move {
                let ctx = self.get_permission_context(&id);
                let roles = self.read_resources(&ctx, &id, ResourceType::Role).await?;
                let mut permission = UserPermission::new(id.as_str());
                permission.add_resources(roles.into_values());
                Ok::<_, RepositoryError>((id, permission.roles()))
            })
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await
    }
}
