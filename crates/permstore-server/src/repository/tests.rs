//! Tests for the store-backed repository.

use super::*;
use permstore_domain::{Account, Application, ResourceType, UNRESTRICTED_USERNAME};
use permstore_storage::MemoryKeyValueStore;

// ============================================================
// Helpers
// ============================================================

fn repository() -> StorePermissionsRepository<MemoryKeyValueStore> {
    StorePermissionsRepository::new(MemoryKeyValueStore::new_shared(), &ServerConfig::default())
}

fn repository_with(
    store: Arc<MemoryKeyValueStore>,
    configure: impl FnOnce(&mut ServerConfig),
) -> StorePermissionsRepository<MemoryKeyValueStore> {
    let mut config = ServerConfig::default();
    configure(&mut config);
    StorePermissionsRepository::new(store, &config)
}

fn role_names(roles: &BTreeSet<Role>) -> BTreeSet<String> {
    roles.iter().map(|r| r.name.clone()).collect()
}

async fn put_unrestricted(
    repo: &StorePermissionsRepository<MemoryKeyValueStore>,
    roles: &[&str],
) {
    let mut unrestricted = UserPermission::unrestricted();
    for role in roles {
        unrestricted.add_resource(Role::new(*role));
    }
    repo.put(&unrestricted).await.unwrap();
}

// ============================================================
// put / get
// ============================================================

#[tokio::test]
async fn test_get_returns_stored_resources_and_flags() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;

    let permission = UserPermission::new("alice")
        .with_admin(true)
        .with_resource(Role::new("eng"))
        .with_resource(Account::new("prod"))
        .with_resource(Application::new("checkout"));
    repo.put(&permission).await.unwrap();

    let stored = repo.get("alice").await.unwrap().unwrap();
    assert_eq!(stored, permission);
}

#[tokio::test]
async fn test_get_unknown_user_is_none() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;
    assert_eq!(repo.get("nobody").await.unwrap(), None);
}

#[tokio::test]
async fn test_ids_are_case_sensitive() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;
    repo.put(&UserPermission::new("Alice")).await.unwrap();

    assert!(repo.get("Alice").await.unwrap().is_some());
    assert!(repo.get("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_put_replaces_previous_value() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;

    repo.put(
        &UserPermission::new("alice")
            .with_admin(true)
            .with_account_manager(true)
            .with_resource(Account::new("prod")),
    )
    .await
    .unwrap();
    repo.put(&UserPermission::new("alice").with_resource(Application::new("checkout")))
        .await
        .unwrap();

    let stored = repo.get("alice").await.unwrap().unwrap();
    assert!(!stored.admin);
    assert!(!stored.account_manager);
    assert!(stored.resources_of(ResourceType::Account).is_none());
    assert_eq!(stored.resource_count(), 1);

    // Empty types leave no key behind.
    let key = repo.schema().user_key("alice", ResourceType::Account);
    assert!(!repo.store().contains_key(&key).await);
}

#[tokio::test]
async fn test_get_merges_unrestricted_resources() {
    let repo = repository();
    let mut unrestricted = UserPermission::unrestricted().with_resource(Role::new("public"));
    unrestricted.add_resource(Application::new("status-page"));
    repo.put(&unrestricted).await.unwrap();
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    let alice = repo.get("alice").await.unwrap().unwrap();
    assert_eq!(
        alice.role_names(),
        ["eng", "public"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
    );
    assert!(alice
        .resources_of(ResourceType::Application)
        .unwrap()
        .contains_key("status-page"));
}

#[tokio::test]
async fn test_get_unrestricted_returns_its_own_permission() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;

    let unrestricted = repo.get(UNRESTRICTED_USERNAME).await.unwrap().unwrap();
    assert!(unrestricted.is_unrestricted());
    assert!(unrestricted.role_names().contains("public"));
}

#[tokio::test]
async fn test_get_without_stored_unrestricted_user_returns_own_resources() {
    let repo = repository();
    let alice = UserPermission::new("alice")
        .with_admin(true)
        .with_resource(Role::new("eng"))
        .with_resource(Account::new("prod"));
    repo.put(&alice).await.unwrap();

    assert_eq!(repo.get("alice").await.unwrap(), Some(alice));

    let unrestricted = repo.get(UNRESTRICTED_USERNAME).await.unwrap().unwrap();
    assert!(unrestricted.is_unrestricted());
    assert_eq!(unrestricted.resource_count(), 0);
}

#[tokio::test]
async fn test_put_of_unrestricted_writes_marker() {
    let repo = repository();
    let key = repo.schema().last_modified_key(UNRESTRICTED_USERNAME);

    put_unrestricted(&repo, &["public"]).await;
    let first = repo.store().get(&key).await.unwrap().unwrap();
    put_unrestricted(&repo, &["public", "extra"]).await;
    let second = repo.store().get(&key).await.unwrap().unwrap();

    assert_ne!(first, second);
    repo.put(&UserPermission::new("alice")).await.unwrap();
    let after_user_put = repo.store().get(&key).await.unwrap().unwrap();
    assert_eq!(second, after_user_put);
}

#[tokio::test]
async fn test_new_marker_refreshes_merged_resources() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;
    repo.put(&UserPermission::new("alice")).await.unwrap();
    assert!(repo
        .get("alice")
        .await
        .unwrap()
        .unwrap()
        .role_names()
        .contains("public"));

    put_unrestricted(&repo, &["everyone"]).await;
    let alice = repo.get("alice").await.unwrap().unwrap();
    assert!(alice.role_names().contains("everyone"));
    assert!(!alice.role_names().contains("public"));
}

#[tokio::test]
async fn test_corrupt_value_is_a_read_failure() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    let key = repo.schema().user_key("alice", ResourceType::Role);
    repo.store().set(&key, b"not a blob".to_vec()).await.unwrap();

    let err = repo.get("alice").await.unwrap_err();
    assert!(matches!(
        err.root(),
        RepositoryError::Deserialization { .. }
    ));
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = Arc::new(MemoryKeyValueStore::new().with_latency(Duration::from_millis(100)));
    let repo = repository_with(store, |config| {
        config.repository.get_permission_timeout_ms = 10;
    });

    let err = repo.get("alice").await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("getPermission for user: alice"));
}

#[tokio::test]
async fn test_unavailable_store_fails_writes() {
    let repo = repository();
    repo.store().set_available(false);

    let err = repo
        .put(&UserPermission::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::PermissionWrite { .. }));
    assert!(matches!(
        err.root(),
        RepositoryError::StoreUnavailable { .. }
    ));
}

#[tokio::test]
async fn test_write_failure_is_logged_with_user() {
    use crate::observability::create_json_layer;
    use crate::observability::tests::CaptureWriter;

    let writer = CaptureWriter::default();
    let _guard = tracing::subscriber::set_default(create_json_layer(writer.clone()));

    let repo = repository();
    repo.store().set_available(false);
    assert!(repo.remove("alice").await.is_err());

    let output = writer.output();
    let failure = output
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|json| json["fields"]["message"] == "storage exception writing entry")
        .expect("write failure logged");
    assert_eq!(failure["level"], "ERROR");
    assert_eq!(failure["fields"]["user"], "alice");
    assert_eq!(failure["fields"]["operation"], "remove");
}

#[tokio::test]
async fn test_put_all_by_id_attempts_every_entry() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;

    let permissions: HashMap<String, UserPermission> = ["alice", "bob", "carol"]
        .iter()
        .map(|id| (id.to_string(), UserPermission::new(*id).with_resource(Role::new("eng"))))
        .collect();
    repo.put_all_by_id(&permissions).await.unwrap();

    for id in ["alice", "bob", "carol"] {
        assert!(repo.get(id).await.unwrap().is_some());
    }
}

// ============================================================
// remove
// ============================================================

#[tokio::test]
async fn test_remove_clears_every_index() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;
    repo.put(
        &UserPermission::new("alice")
            .with_admin(true)
            .with_account_manager(true)
            .with_resource(Role::new("eng"))
            .with_resource(Account::new("prod")),
    )
    .await
    .unwrap();

    repo.remove("alice").await.unwrap();

    assert_eq!(repo.get("alice").await.unwrap(), None);
    let store = repo.store();
    let schema = repo.schema();
    for key in [
        schema.role_key("eng"),
        schema.admin_key(),
        schema.account_managers_key(),
    ] {
        assert!(!store.set_contains(&key, "alice").await.unwrap());
    }
    for resource_type in ResourceType::ALL {
        assert!(!store.contains_key(&schema.user_key("alice", resource_type)).await);
    }
}

#[tokio::test]
async fn test_remove_absent_user_is_noop() {
    let repo = repository();
    repo.remove("ghost").await.unwrap();
    repo.remove("ghost").await.unwrap();
}

// ============================================================
// bulk queries
// ============================================================

#[tokio::test]
async fn test_get_all_by_id_returns_stored_roles_only() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();
    repo.put(&UserPermission::new("bob")).await.unwrap();

    let all = repo.get_all_by_id().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(
        role_names(&all["alice"]),
        ["eng".to_string()].into_iter().collect::<BTreeSet<_>>()
    );
    assert!(all["bob"].is_empty());
    assert_eq!(
        role_names(&all[UNRESTRICTED_USERNAME]),
        ["public".to_string()].into_iter().collect::<BTreeSet<_>>()
    );

    // get still merges, the bulk view does not.
    let alice = repo.get("alice").await.unwrap().unwrap();
    assert!(alice.role_names().contains("public"));
}

#[tokio::test]
async fn test_get_all_by_id_without_unrestricted_user() {
    let repo = repository();
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    let all = repo.get_all_by_id().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(
        role_names(&all["alice"]),
        ["eng".to_string()].into_iter().collect::<BTreeSet<_>>()
    );
}

#[tokio::test]
async fn test_get_all_by_roles_filters_by_any_role() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();
    repo.put(&UserPermission::new("bob").with_resource(Role::new("ops")))
        .await
        .unwrap();
    repo.put(&UserPermission::new("carol").with_resource(Role::new("sales")))
        .await
        .unwrap();

    let roles = vec!["eng".to_string(), "ops".to_string(), "eng".to_string()];
    let result = repo.get_all_by_roles(Some(roles.as_slice())).await.unwrap();

    let ids: BTreeSet<_> = result.keys().cloned().collect();
    assert_eq!(
        ids,
        ["alice", "bob", UNRESTRICTED_USERNAME]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>()
    );
}

#[tokio::test]
async fn test_get_all_by_roles_none_matches_get_all_by_id() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    assert_eq!(
        repo.get_all_by_roles(None).await.unwrap(),
        repo.get_all_by_id().await.unwrap()
    );
}

#[tokio::test]
async fn test_get_all_by_roles_empty_returns_only_unrestricted() {
    let repo = repository();
    put_unrestricted(&repo, &["public"]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    let result = repo.get_all_by_roles(Some(&[][..])).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        role_names(&result[UNRESTRICTED_USERNAME]),
        ["public".to_string()].into_iter().collect::<BTreeSet<_>>()
    );
}

#[tokio::test]
async fn test_get_all_by_roles_always_reports_unrestricted_user() {
    let repo = repository();
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();

    let empty = repo.get_all_by_roles(Some(&[][..])).await.unwrap();
    assert_eq!(
        empty,
        HashMap::from([(UNRESTRICTED_USERNAME.to_string(), BTreeSet::new())])
    );

    let eng = repo
        .get_all_by_roles(Some(&["eng".to_string()][..]))
        .await
        .unwrap();
    assert_eq!(eng.len(), 2);
    assert!(eng[UNRESTRICTED_USERNAME].is_empty());
}

#[tokio::test]
async fn test_get_all_by_roles_fails_when_a_role_read_fails() {
    let store = MemoryKeyValueStore::new_shared();
    let repo = repository_with(Arc::clone(&store), |_| {});
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();
    let key = repo.schema().user_key("alice", ResourceType::Role);
    store.set(&key, b"not a blob".to_vec()).await.unwrap();

    let err = repo
        .get_all_by_roles(Some(&["eng".to_string()][..]))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), RepositoryError::Deserialization { .. }));
}

#[tokio::test]
async fn test_role_index_follows_role_changes() {
    let repo = repository();
    put_unrestricted(&repo, &[]).await;
    repo.put(&UserPermission::new("alice").with_resource(Role::new("eng")))
        .await
        .unwrap();
    repo.put(&UserPermission::new("alice").with_resource(Role::new("ops")))
        .await
        .unwrap();

    let eng = repo
        .get_all_by_roles(Some(&["eng".to_string()][..]))
        .await
        .unwrap();
    assert!(!eng.contains_key("alice"));
    let ops = repo
        .get_all_by_roles(Some(&["ops".to_string()][..]))
        .await
        .unwrap();
    assert!(ops.contains_key("alice"));
}

// ============================================================
// construction
// ============================================================

#[tokio::test]
async fn test_from_config_rejects_unknown_backend() {
    let mut config = ServerConfig::default();
    config.storage.backend = "redis".to_string();
    assert!(StorePermissionsRepository::from_config(&config).is_err());

    let repo = StorePermissionsRepository::from_config(&ServerConfig::default()).unwrap();
    assert!(repo.health_check().await.unwrap().healthy);
}
