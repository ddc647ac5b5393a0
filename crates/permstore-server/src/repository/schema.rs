//! Key layout of the permission store.
//!
//! ```text
//! {prefix}:users                                  set of every stored id
//! {prefix}:permissions:admin                      set of admin ids
//! {prefix}:accountmanagers                        set of account-manager ids
//! {prefix}:roles:{role}                           set of ids holding {role}
//! {prefix}:permissions-v2:{id}:{type suffix}      encoded resources of one type
//! {prefix}:last_modified:{id}                     server time of the last put
//! {prefix}:tmp:{uuid}                             scratch value, renamed into place
//! ```

use permstore_domain::ResourceType;
use uuid::Uuid;

const KEY_PERMISSIONS: &str = "permissions-v2";
const KEY_ROLES: &str = "roles";
const KEY_ALL_USERS: &str = "users";
const KEY_ADMIN: &str = "permissions:admin";
const KEY_ACCOUNT_MANAGERS: &str = "accountmanagers";
const KEY_LAST_MODIFIED: &str = "last_modified";
const KEY_SCRATCH: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn all_users_key(&self) -> String {
        format!("{}:{}", self.prefix, KEY_ALL_USERS)
    }

    pub fn admin_key(&self) -> String {
        format!("{}:{}", self.prefix, KEY_ADMIN)
    }

    pub fn account_managers_key(&self) -> String {
        format!("{}:{}", self.prefix, KEY_ACCOUNT_MANAGERS)
    }

    pub fn role_key(&self, role: &str) -> String {
        format!("{}:{}:{}", self.prefix, KEY_ROLES, role)
    }

    pub fn user_key(&self, id: &str, resource_type: ResourceType) -> String {
        format!(
            "{}:{}:{}:{}",
            self.prefix,
            KEY_PERMISSIONS,
            id,
            resource_type.key_suffix()
        )
    }

    pub fn last_modified_key(&self, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, KEY_LAST_MODIFIED, id)
    }

    /// A fresh, unique scratch key.
    pub fn scratch_key(&self) -> String {
        format!("{}:{}:{}", self.prefix, KEY_SCRATCH, Uuid::new_v4())
    }
}
