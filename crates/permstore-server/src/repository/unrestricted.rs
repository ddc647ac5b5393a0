//! Cache for the unrestricted user's permission.
//!
//! Every read of an ordinary user merges in the unrestricted user's
//! resources, so this permission is read far more often than it changes.
//! It is cached keyed by the last-modified marker written alongside it:
//! a new marker forces a fresh load, an unchanged one is served from
//! memory.
//!
//! Concurrent misses for the same marker share one load. When a refresh
//! fails, the entry under the last marker that loaded successfully is
//! served instead, if it is still resident.

use std::future::Future;
use std::sync::{Arc, Mutex};

use moka::future::Cache;
use permstore_domain::{UserPermission, UNRESTRICTED_USERNAME};
use tracing::{debug, error, warn};

use super::singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};
use crate::config::UnrestrictedCacheSettings;
use crate::error::{RepositoryError, RepositoryResult};
use crate::observability::{
    UNRESTRICTED_CACHE_HITS, UNRESTRICTED_CACHE_MISSES, UNRESTRICTED_FALLBACKS,
};

/// Marker used when the stored marker cannot be read or was never written.
pub const UNKNOWN_LAST_MODIFIED: &str = "unknown_last_modified";

type LoadResult = RepositoryResult<Arc<UserPermission>>;

pub struct UnrestrictedCache {
    entries: Cache<String, Arc<UserPermission>>,
    loads: Singleflight<String, LoadResult>,
    fallback_marker: Mutex<Option<String>>,
}

impl UnrestrictedCache {
    pub fn new(settings: &UnrestrictedCacheSettings) -> Self {
        let entries = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_idle(settings.expire_after_access())
            .build();

        Self {
            entries,
            loads: Singleflight::new(),
            fallback_marker: Mutex::new(None),
        }
    }

    /// Returns the permission cached under `marker`, loading it with `load`
    /// on a miss.
    ///
    /// On failure, falls back to the entry of the last marker that loaded
    /// successfully; if that entry has been evicted the failure is returned.
    pub async fn get_or_load<F, Fut>(&self, marker: &str, load: F) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepositoryResult<UserPermission>>,
    {
        match self.lookup(marker, load).await {
            Ok(permission) => {
                if marker != UNKNOWN_LAST_MODIFIED {
                    *self.lock_fallback() = Some(marker.to_string());
                }
                Ok(permission)
            }
            Err(e) => {
                error!(
                    user = UNRESTRICTED_USERNAME,
                    marker,
                    error = %e,
                    "failed reading user from cache"
                );
                self.fallback(e).await
            }
        }
    }

    /// Marker of the last successful load, if any.
    pub fn fallback_marker(&self) -> Option<String> {
        self.lock_fallback().clone()
    }

    /// Cached permission for `marker`, without loading.
    pub async fn peek(&self, marker: &str) -> Option<Arc<UserPermission>> {
        self.entries.get(marker).await
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    async fn lookup<F, Fut>(&self, marker: &str, load: F) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepositoryResult<UserPermission>>,
    {
        let (tx, guard) = loop {
            if let Some(hit) = self.entries.get(marker).await {
                metrics::counter!(UNRESTRICTED_CACHE_HITS).increment(1);
                return Ok(hit);
            }

            match self.loads.acquire(marker.to_string()) {
                SingleflightSlot::Leader(tx) => {
                    break (tx, SingleflightGuard::new(&self.loads, marker.to_string()));
                }
                SingleflightSlot::Follower(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // Leader went away without a result; try again.
                    Err(_) => continue,
                },
            }
        };

        // A previous leader may have filled the entry between our miss and
        // acquiring the slot.
        if let Some(hit) = self.entries.get(marker).await {
            guard.complete();
            let _ = tx.send(Ok(Arc::clone(&hit)));
            metrics::counter!(UNRESTRICTED_CACHE_HITS).increment(1);
            return Ok(hit);
        }

        metrics::counter!(UNRESTRICTED_CACHE_MISSES).increment(1);
        let result = load().await.map(Arc::new);

        if let Ok(permission) = &result {
            debug!(
                user = UNRESTRICTED_USERNAME,
                marker,
                resources = permission.resource_count(),
                "reloaded user"
            );
            self.entries
                .insert(marker.to_string(), Arc::clone(permission))
                .await;
        }

        // Entry first, then release the slot, then wake followers: a caller
        // arriving after release finds the entry.
        guard.complete();
        let _ = tx.send(result.clone());
        result
    }

    async fn fallback(&self, err: RepositoryError) -> LoadResult {
        if let Some(marker) = self.fallback_marker() {
            if let Some(permission) = self.entries.get(&marker).await {
                warn!(
                    user = UNRESTRICTED_USERNAME,
                    marker = %marker,
                    "serving fallback permission"
                );
                metrics::counter!(UNRESTRICTED_FALLBACKS).increment(1);
                return Ok(permission);
            }
            warn!(marker = %marker, "no fallback entry remaining in cache");
        }
        Err(err)
    }

    fn lock_fallback(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.fallback_marker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permstore_domain::Role;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn cache() -> UnrestrictedCache {
        UnrestrictedCache::new(&UnrestrictedCacheSettings::default())
    }

    fn permission(role: &str) -> UserPermission {
        UserPermission::unrestricted().with_resource(Role::new(role))
    }

    fn unavailable() -> RepositoryError {
        RepositoryError::StoreUnavailable {
            message: "down".to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_marker_loads_once() {
        let cache = cache();
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let p = cache
                .get_or_load("m1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(permission("public"))
                })
                .await
                .unwrap();
            assert!(p.role_names().contains("public"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fallback_marker().as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_new_marker_forces_reload() {
        let cache = cache();
        cache
            .get_or_load("m1", || async { Ok(permission("old")) })
            .await
            .unwrap();
        let p = cache
            .get_or_load("m2", || async { Ok(permission("new")) })
            .await
            .unwrap();
        assert!(p.role_names().contains("new"));
        assert_eq!(cache.fallback_marker().as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_unknown_marker_is_never_remembered() {
        let cache = cache();
        cache
            .get_or_load(UNKNOWN_LAST_MODIFIED, || async { Ok(permission("x")) })
            .await
            .unwrap();
        assert_eq!(cache.fallback_marker(), None);
    }

    #[tokio::test]
    async fn test_failed_load_serves_fallback() {
        let cache = cache();
        cache
            .get_or_load("m1", || async { Ok(permission("public")) })
            .await
            .unwrap();

        let p = cache
            .get_or_load(UNKNOWN_LAST_MODIFIED, || async { Err(unavailable()) })
            .await
            .unwrap();
        assert!(p.role_names().contains("public"));
    }

    #[tokio::test]
    async fn test_failure_without_fallback_propagates() {
        let cache = cache();
        let err = cache
            .get_or_load("m1", || async { Err(unavailable()) })
            .await
            .unwrap_err();
        assert_eq!(err, unavailable());
        assert!(cache.peek("m1").await.is_none());
    }

    #[tokio::test]
    async fn test_failure_with_evicted_fallback_propagates() {
        let cache = cache();
        cache
            .get_or_load("m1", || async { Ok(permission("public")) })
            .await
            .unwrap();
        cache.invalidate_all();

        let err = cache
            .get_or_load("m2", || async { Err(unavailable()) })
            .await
            .unwrap_err();
        assert_eq!(err, unavailable());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let cache = Arc::new(cache());
        let loads = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                tokio::spawn(async move {
                    cache
                        .get_or_load("m1", || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(permission("public"))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_followers_share_leader_failure() {
        let cache = Arc::new(cache());
        let loads = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                tokio::spawn(async move {
                    cache
                        .get_or_load("m1", || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(unavailable())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }
        // Failures are not cached, but concurrent waiters still shared the first load.
        assert!(loads.load(Ordering::SeqCst) < 8);
    }
}
