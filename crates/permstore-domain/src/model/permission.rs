//! Per-user permission sets.

use std::collections::{BTreeMap, BTreeSet};

use super::types::{Resource, ResourceType, Role};

/// Reserved id of the synthetic user whose resources are granted to everyone.
pub const UNRESTRICTED_USERNAME: &str = "__unrestricted_user__";

/// Resources of a single type, keyed by resource name.
pub type ResourceMap = BTreeMap<String, Resource>;

/// Everything a user may act on, plus their global flags.
///
/// A stored `UserPermission` is always written as a whole: there is no
/// partial update of a user's resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPermission {
    /// Case-sensitive username, or [`UNRESTRICTED_USERNAME`].
    pub id: String,
    pub admin: bool,
    pub account_manager: bool,
    resources: BTreeMap<ResourceType, ResourceMap>,
}

impl UserPermission {
    /// Creates an empty permission set for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Creates an empty permission set for the unrestricted user.
    pub fn unrestricted() -> Self {
        Self::new(UNRESTRICTED_USERNAME)
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_account_manager(mut self, account_manager: bool) -> Self {
        self.account_manager = account_manager;
        self
    }

    /// Adds a resource, returning `self` for chaining.
    pub fn with_resource(mut self, resource: impl Into<Resource>) -> Self {
        self.add_resource(resource);
        self
    }

    /// Adds or replaces a resource with the same type and name.
    pub fn add_resource(&mut self, resource: impl Into<Resource>) {
        let resource = resource.into();
        self.resources
            .entry(resource.resource_type())
            .or_default()
            .insert(resource.name().to_string(), resource);
    }

    pub fn add_resources<I, R>(&mut self, resources: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Resource>,
    {
        for resource in resources {
            self.add_resource(resource);
        }
    }

    /// Whether this is the unrestricted user.
    pub fn is_unrestricted(&self) -> bool {
        self.id == UNRESTRICTED_USERNAME
    }

    /// Resources of one type, if any were added.
    pub fn resources_of(&self, resource_type: ResourceType) -> Option<&ResourceMap> {
        self.resources.get(&resource_type)
    }

    /// Resources grouped by type.
    pub fn resources(&self) -> &BTreeMap<ResourceType, ResourceMap> {
        &self.resources
    }

    /// All resources across all types.
    pub fn all_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values().flat_map(|m| m.values())
    }

    /// Total number of resources across all types.
    pub fn resource_count(&self) -> usize {
        self.resources.values().map(|m| m.len()).sum()
    }

    pub fn roles(&self) -> BTreeSet<Role> {
        self.resources_of(ResourceType::Role)
            .into_iter()
            .flat_map(|m| m.values())
            .filter_map(Resource::as_role)
            .cloned()
            .collect()
    }

    pub fn role_names(&self) -> BTreeSet<String> {
        self.resources_of(ResourceType::Role)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Merges `other`'s resources into this set.
    ///
    /// Resources already present under the same type and name are kept;
    /// flags are not touched.
    pub fn merge(&mut self, other: &UserPermission) {
        for (resource_type, resources) in &other.resources {
            let target = self.resources.entry(*resource_type).or_default();
            for (name, resource) in resources {
                target
                    .entry(name.clone())
                    .or_insert_with(|| resource.clone());
            }
        }
    }
}
