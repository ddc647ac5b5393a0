//! Store contract tests.
//!
//! These tests exercise the `KeyValueStore` contract through the generic
//! trait so any backend can be run through the same helpers. The in-memory
//! store is the only backend shipped here.

use std::sync::Arc;
use std::time::Duration;

use permstore_storage::{
    Batch, KeyValueStore, MemoryKeyValueStore, Reply, RetryPolicy, RetryingClient, StorageError,
    SystemClock, TimeoutContext,
};

/// Helper function to run basic value/set operations against any store.
async fn run_basic_contract<S: KeyValueStore>(store: &S) {
    assert_eq!(store.get("contract:k").await.unwrap(), None);
    store.set("contract:k", b"v1".to_vec()).await.unwrap();
    assert_eq!(store.get("contract:k").await.unwrap(), Some(b"v1".to_vec()));

    assert!(store.set_add("contract:s", "alice").await.unwrap());
    assert!(store.set_contains("contract:s", "alice").await.unwrap());
    assert!(!store.set_contains("contract:s", "bob").await.unwrap());

    store.rename("contract:k", "contract:k2").await.unwrap();
    assert_eq!(store.get("contract:k").await.unwrap(), None);
    assert_eq!(store.get("contract:k2").await.unwrap(), Some(b"v1".to_vec()));

    assert!(store.delete("contract:k2").await.unwrap());
    assert!(store.set_remove("contract:s", "alice").await.unwrap());
    assert!(store.set_members("contract:s").await.unwrap().is_empty());
}

/// Helper verifying a failed batch is invisible.
async fn run_batch_atomicity_contract<S: KeyValueStore>(store: &S) {
    store.set("atomic:a", vec![1]).await.unwrap();

    let mut batch = Batch::new();
    batch.set("atomic:a", vec![2]);
    batch.set_add("atomic:users", "alice");
    batch.delete("atomic:a");
    batch.rename("atomic:missing", "atomic:b");

    match store.execute(batch).await {
        Err(StorageError::BatchFailed { index, source }) => {
            assert_eq!(index, 3);
            assert!(matches!(*source, StorageError::NoSuchKey { .. }));
        }
        other => panic!("expected batch failure, got {other:?}"),
    }

    assert_eq!(store.get("atomic:a").await.unwrap(), Some(vec![1]));
    assert!(store.set_members("atomic:users").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_store_basic_contract() {
    run_basic_contract(&MemoryKeyValueStore::new()).await;
}

#[tokio::test]
async fn test_memory_store_batch_atomicity() {
    run_batch_atomicity_contract(&MemoryKeyValueStore::new()).await;
}

#[tokio::test]
async fn test_readers_never_observe_half_applied_batch() {
    let store = MemoryKeyValueStore::new_shared();

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..200u32 {
                let mut batch = Batch::new();
                let value = i.to_be_bytes().to_vec();
                batch.set("pair:tmp-a", value.clone());
                batch.rename("pair:tmp-a", "pair:a");
                batch.set("pair:tmp-b", value);
                batch.rename("pair:tmp-b", "pair:b");
                store.execute(batch).await.unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..200 {
                // Scratch keys are renamed inside the same batch, so no reader sees them.
                assert!(!store.contains_key("pair:tmp-a").await);
                assert!(!store.contains_key("pair:tmp-b").await);
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}

#[tokio::test]
async fn test_batch_time_reply_matches_store_time_ordering() {
    let store = MemoryKeyValueStore::new();
    let before = store.time().await.unwrap();

    let mut batch = Batch::new();
    batch.set_add("users", "alice");
    let idx = batch.time();
    let replies = store.execute(batch).await.unwrap();
    let during = permstore_storage::time_reply(&replies, idx).unwrap();

    let after = store.time().await.unwrap();
    assert!(before < during);
    assert!(during < after);
    assert_eq!(replies[0], Reply::Bool(true));
}

#[tokio::test]
async fn test_client_pool_bounds_concurrent_reads() {
    let store = Arc::new(MemoryKeyValueStore::new().with_latency(Duration::from_millis(20)));
    let client = RetryingClient::new(Arc::clone(&store), RetryPolicy::none(), 2);

    let reads = (0..6).map(|i| {
        let client = client.clone();
        async move {
            let ctx = TimeoutContext::new(
                format!("read {i}"),
                Arc::new(SystemClock),
                Duration::from_secs(5),
            );
            client
                .read(&ctx, |s| async move { s.get("k").await })
                .await
        }
    });

    let start = std::time::Instant::now();
    let results = futures::future::join_all(reads).await;
    assert!(results.iter().all(|r| r.is_ok()));
    // Six 20ms reads through two permits need at least three rounds.
    assert!(start.elapsed() >= Duration::from_millis(55));
    assert_eq!(client.available_permits(), 2);
}
