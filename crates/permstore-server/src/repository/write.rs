//! Mutations: put and remove.
//!
//! Each mutation is a single atomic [`Batch`]. Resource values are first
//! written under a scratch key and then renamed over the final key, so a
//! reader sees either the old value or the new one and never a partial
//! write.

use std::collections::BTreeSet;

use permstore_domain::{ResourceCodec, ResourceType, UserPermission, UNRESTRICTED_USERNAME};
use permstore_storage::{time_reply, Batch, KeyValueStore};
use tracing::debug;

use super::schema::KeySchema;
use super::StorePermissionsRepository;
use crate::error::RepositoryResult;

/// Builds the batch that replaces everything stored for `permission.id`.
///
/// `previous_roles` are the role names currently stored for the user; the
/// user is removed from any of those roles it no longer holds. Returns the
/// batch and the reply index of its server-time command.
pub fn build_put_batch(
    schema: &KeySchema,
    codec: &dyn ResourceCodec,
    permission: &UserPermission,
    previous_roles: &BTreeSet<String>,
) -> RepositoryResult<(Batch, usize)> {
    let id = permission.id.as_str();
    let mut batch = Batch::new();

    for resource_type in ResourceType::ALL {
        let key = schema.user_key(id, resource_type);
        match permission.resources_of(resource_type) {
            Some(resources) if !resources.is_empty() => {
                let value = codec.encode(resource_type, resources)?;
                let scratch = schema.scratch_key();
                batch.set(scratch.clone(), value);
                batch.rename(scratch, key);
            }
            _ => {
                batch.delete(key);
            }
        }
    }

    if permission.admin {
        batch.set_add(schema.admin_key(), id);
    } else {
        batch.set_remove(schema.admin_key(), id);
    }

    if permission.account_manager {
        batch.set_add(schema.account_managers_key(), id);
    } else {
        batch.set_remove(schema.account_managers_key(), id);
    }

    let roles = permission.role_names();
    for role in &roles {
        batch.set_add(schema.role_key(role), id);
    }
    for role in previous_roles.difference(&roles) {
        batch.set_remove(schema.role_key(role), id);
    }

    let time_index = batch.time();
    batch.set_add(schema.all_users_key(), id);

    Ok((batch, time_index))
}

/// Builds the batch that deletes everything stored for `id`.
pub fn build_remove_batch(
    schema: &KeySchema,
    id: &str,
    previous_roles: &BTreeSet<String>,
) -> Batch {
    let mut batch = Batch::new();
    batch.set_remove(schema.all_users_key(), id);
    for role in previous_roles {
        batch.set_remove(schema.role_key(role), id);
    }
    for resource_type in ResourceType::ALL {
        batch.delete(schema.user_key(id, resource_type));
    }
    batch.set_remove(schema.admin_key(), id);
    batch.set_remove(schema.account_managers_key(), id);
    batch
}

impl<S: KeyValueStore> StorePermissionsRepository<S> {
    pub(super) async fn write_permission(&self, permission: &UserPermission) -> RepositoryResult<()> {
        let id = permission.id.as_str();
        let ctx = self.get_permission_context(id);
        let previous_roles = self.read_role_names(&ctx, id).await?;

        let (batch, time_index) =
            build_put_batch(&self.schema, self.codec.as_ref(), permission, &previous_roles)?;
        let commands = batch.len();
        let replies = self
            .client
            .write(|store| async move { store.execute(batch).await })
            .await?;
        debug!(user = id, commands, "wrote permission batch");

        if permission.is_unrestricted() {
            // Separate from the batch: the marker only invalidates caches.
            let last_modified = time_reply(&replies, time_index)?.marker();
            let key = self.schema.last_modified_key(UNRESTRICTED_USERNAME);
            debug!(user = id, last_modified = %last_modified, "set last modified");
            self.client
                .write(|store| async move { store.set(&key, last_modified.into_bytes()).await })
                .await?;
        }

        Ok(())
    }

    pub(super) async fn remove_permission(&self, id: &str) -> RepositoryResult<()> {
        let ctx = self.get_permission_context(id);
        let previous_roles = self.read_role_names(&ctx, id).await?;
        let batch = build_remove_batch(&self.schema, id, &previous_roles);

        self.client
            .write(|store| async move { store.execute(batch).await })
            .await?;
        debug!(user = id, roles = previous_roles.len(), "removed permission");
        Ok(())
    }
}
