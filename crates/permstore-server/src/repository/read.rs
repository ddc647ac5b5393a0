//! Single-user read path.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use permstore_domain::{ResourceMap, ResourceType, UserPermission, UNRESTRICTED_USERNAME};
use permstore_storage::{KeyValueStore, TimeoutContext};
use tracing::{debug, warn};

use super::unrestricted::UNKNOWN_LAST_MODIFIED;
use super::StorePermissionsRepository;
use crate::error::RepositoryResult;

impl<S: KeyValueStore> StorePermissionsRepository<S> {
    pub(super) async fn read_value(
        &self,
        ctx: &TimeoutContext,
        key: String,
    ) -> RepositoryResult<Option<Vec<u8>>> {
        let value = self
            .client
            .read(ctx, |store| {
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await?;
        Ok(value)
    }

    pub(super) async fn read_is_member(
        &self,
        ctx: &TimeoutContext,
        key: String,
        member: &str,
    ) -> RepositoryResult<bool> {
        let is_member = self
            .client
            .read(ctx, |store| {
                let key = key.clone();
                let member = member.to_string();
                async move { store.set_contains(&key, &member).await }
            })
            .await?;
        Ok(is_member)
    }

    pub(super) async fn read_members(
        &self,
        ctx: &TimeoutContext,
        key: String,
    ) -> RepositoryResult<HashSet<String>> {
        let members = self
            .client
            .read(ctx, |store| {
                let key = key.clone();
                async move { store.set_members(&key).await }
            })
            .await?;
        Ok(members)
    }

    /// Decoded resources of one type; a missing key is an empty map.
    pub(super) async fn read_resources(
        &self,
        ctx: &TimeoutContext,
        id: &str,
        resource_type: ResourceType,
    ) -> RepositoryResult<ResourceMap> {
        match self
            .read_value(ctx, self.schema.user_key(id, resource_type))
            .await?
        {
            Some(bytes) => Ok(self.codec.decode(&bytes, resource_type)?),
            None => Ok(ResourceMap::new()),
        }
    }

    pub(super) async fn read_role_names(
        &self,
        ctx: &TimeoutContext,
        id: &str,
    ) -> RepositoryResult<BTreeSet<String>> {
        Ok(self
            .read_resources(ctx, id, ResourceType::Role)
            .await?
            .into_keys()
            .collect())
    }

    /// Every stored resource of `id`; missing types are empty.
    async fn load_resources(
        &self,
        ctx: &TimeoutContext,
        id: &str,
    ) -> RepositoryResult<UserPermission> {
        let resources = try_join_all(
            ResourceType::ALL
                .into_iter()
                .map(|resource_type| self.read_resources(ctx, id, resource_type)),
        )
        .await?;

        let mut permission = UserPermission::new(id);
        for map in resources {
            permission.add_resources(map.into_values());
        }
        Ok(permission)
    }

    /// The stored permission for `id`, without the unrestricted merge.
    pub(super) async fn load_user(
        &self,
        ctx: &TimeoutContext,
        id: &str,
    ) -> RepositoryResult<Option<UserPermission>> {
        if !self
            .read_is_member(ctx, self.schema.all_users_key(), id)
            .await?
        {
            debug!(user = id, "request for user not found in store");
            return Ok(None);
        }

        let permission = self.load_resources(ctx, id).await?;
        let (admin, account_manager) = futures::try_join!(
            self.read_is_member(ctx, self.schema.admin_key(), id),
            self.read_is_member(ctx, self.schema.account_managers_key(), id),
        )?;

        Ok(Some(
            permission
                .with_admin(admin)
                .with_account_manager(account_manager),
        ))
    }

    pub(super) async fn read_permission(
        &self,
        id: &str,
    ) -> RepositoryResult<Option<UserPermission>> {
        if id == UNRESTRICTED_USERNAME {
            let unrestricted = self.unrestricted_permission().await?;
            return Ok(Some(unrestricted.as_ref().clone()));
        }

        let ctx = self.get_permission_context(id);
        let Some(mut permission) = self.load_user(&ctx, id).await? else {
            return Ok(None);
        };

        let unrestricted = self.unrestricted_permission().await?;
        permission.merge(&unrestricted);
        Ok(Some(permission))
    }

    /// The unrestricted user's permission, via the marker-keyed cache.
    async fn unrestricted_permission(
        &self,
    ) -> RepositoryResult<Arc<UserPermission>> {
        let marker = self.read_last_modified().await;
        self.unrestricted
            .get_or_load(&marker, || self.load_unrestricted())
            .await
    }

    async fn read_last_modified(&self) -> String {
        let ctx = self.context(
            "checkLastModified",
            self.timeouts.check_last_modified_timeout(),
        );
        let key = self.schema.last_modified_key(UNRESTRICTED_USERNAME);

        match self.read_value(&ctx, key).await {
            Ok(Some(bytes)) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(_) => {
                debug!(
                    user = UNRESTRICTED_USERNAME,
                    default = UNKNOWN_LAST_MODIFIED,
                    "no last modified time available"
                );
                UNKNOWN_LAST_MODIFIED.to_string()
            }
            Err(e) => {
                warn!(
                    user = UNRESTRICTED_USERNAME,
                    error = %e,
                    "failed reading last modified time"
                );
                UNKNOWN_LAST_MODIFIED.to_string()
            }
        }
    }

    /// The unrestricted user always exists: nothing stored reads as no resources.
    async fn load_unrestricted(&self) -> RepositoryResult<UserPermission> {
        let ctx = self.get_permission_context(UNRESTRICTED_USERNAME);
        self.load_resources(&ctx, UNRESTRICTED_USERNAME).await
    }
}
