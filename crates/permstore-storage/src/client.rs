//! Retrying, pool-bounded access to a [`KeyValueStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{StorageError, StorageResult};
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutContext;
use crate::traits::KeyValueStore;

/// Histogram of read latency, labelled by outcome.
pub const STORE_READ_DURATION: &str = "permstore_store_read_duration_seconds";
/// Counter of reads abandoned at their deadline, labelled by operation.
pub const STORE_TIMEOUTS: &str = "permstore_store_timeouts_total";

/// Wraps a store with a retry policy and a bound on in-flight operations.
///
/// Reads go through [`read`](Self::read): every attempt is checked against
/// the caller's [`TimeoutContext`] before it is issued, connection failures
/// are retried per the policy, and nothing (neither an attempt nor a backoff
/// sleep) runs past the context's expiry.
///
/// Writes go through [`write`](Self::write) and are attempted once.
#[derive(Debug)]
pub struct RetryingClient<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl<S> Clone for RetryingClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<S: KeyValueStore> RetryingClient<S> {
    /// `pool_size` caps concurrent store operations issued through this client.
    pub fn new(store: Arc<S>, policy: RetryPolicy, pool_size: usize) -> Self {
        Self {
            store,
            policy,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs a read under `ctx` with retries.
    pub async fn read<T, F, Fut>(&self, ctx: &TimeoutContext, f: F) -> StorageResult<T>
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let result = self
            .policy
            .execute_within(
                || self.attempt(ctx, &f),
                StorageError::is_retryable,
                || Some(ctx.remaining()),
            )
            .await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "error",
        };
        metrics::histogram!(
            STORE_READ_DURATION,
            "status" => status
        )
        .record(start.elapsed().as_secs_f64());
        if status == "timeout" {
            metrics::counter!(
                STORE_TIMEOUTS,
                "operation" => ctx.name().to_string()
            )
            .increment(1);
        }

        result
    }

    /// Runs a write once, holding a pool permit.
    pub async fn write<T, F, Fut>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let _permit = self.acquire().await?;
        f(Arc::clone(&self.store)).await
    }

    async fn attempt<T, F, Fut>(&self, ctx: &TimeoutContext, f: &F) -> StorageResult<T>
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let _permit = ctx.run(self.acquire()).await?;
        ctx.run(f(Arc::clone(&self.store))).await
    }

    async fn acquire(&self) -> StorageResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| StorageError::InternalError {
                message: "store client pool closed".to_string(),
            })
    }
}
