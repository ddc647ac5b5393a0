//! Property-based tests for model types.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::{Account, Resource, ResourceType, Role, UserPermission};

    /// Strategy for a set of (type, name) grants, kept small so collisions happen.
    fn grants_strategy() -> impl Strategy<Value = Vec<(bool, String)>> {
        prop::collection::vec((any::<bool>(), "[a-d]{1,2}"), 0..12)
    }

    fn build(id: &str, grants: &[(bool, String)], provider: &str) -> UserPermission {
        let mut permission = UserPermission::new(id);
        for (is_role, name) in grants {
            if *is_role {
                permission.add_resource(Role::new(name.clone()));
            } else {
                let mut account = Account::new(name.clone());
                account.cloud_provider = Some(provider.to_string());
                permission.add_resource(account);
            }
        }
        permission
    }

    proptest! {
        #[test]
        fn test_merge_is_superset_of_unrestricted(
            user_grants in grants_strategy(),
            global_grants in grants_strategy(),
        ) {
            let mut user = build("alice", &user_grants, "user");
            let original = user.clone();
            let unrestricted = build("__unrestricted_user__", &global_grants, "global");

            user.merge(&unrestricted);

            // Every unrestricted resource is present by (type, name).
            for resource in unrestricted.all_resources() {
                let present = user
                    .resources_of(resource.resource_type())
                    .map(|m| m.contains_key(resource.name()))
                    .unwrap_or(false);
                prop_assert!(present, "missing {}", resource.name());
            }

            // User-owned entries win ties.
            for resource in original.all_resources() {
                let merged = &user.resources_of(resource.resource_type()).unwrap()[resource.name()];
                prop_assert_eq!(merged, resource);
            }
        }

        #[test]
        fn test_merge_is_idempotent(
            user_grants in grants_strategy(),
            global_grants in grants_strategy(),
        ) {
            let unrestricted = build("__unrestricted_user__", &global_grants, "global");
            let mut once = build("alice", &user_grants, "user");
            once.merge(&unrestricted);
            let mut twice = once.clone();
            twice.merge(&unrestricted);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_resource_type_round_trips_through_name(index in 0usize..5) {
            let resource_type = ResourceType::ALL[index];
            let parsed: ResourceType = resource_type.as_str().parse().unwrap();
            prop_assert_eq!(parsed, resource_type);
        }

        #[test]
        fn test_role_names_match_roles(names in prop::collection::btree_set("[a-z]{1,8}", 0..8)) {
            let mut permission = UserPermission::new("bob");
            permission.add_resources(names.iter().cloned().map(Role::new));
            let from_roles: std::collections::BTreeSet<String> =
                permission.roles().into_iter().map(|r| r.name).collect();
            prop_assert_eq!(&from_roles, &names);
            prop_assert!(permission.all_resources().all(|r| matches!(r, Resource::Role(_))));
        }
    }
}
