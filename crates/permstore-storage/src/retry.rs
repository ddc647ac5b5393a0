//! Retry policy for store reads.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// delay * (attempt + 1)
    Linear,
    /// delay * 2^attempt
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (0 = first retry), capped at `max_delay`.
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt))
            }
        };
        delay.min(max_delay)
    }
}

/// Bounded retry with backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.strategy
            .calculate_delay(attempt, self.initial_delay, self.max_delay)
    }

    /// Runs `operation`, retrying failures `is_retryable` accepts.
    pub async fn execute<F, Fut, T, E, P>(&self, operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.execute_within(operation, is_retryable, || None).await
    }

    /// Like [`execute`](Self::execute), but stops retrying once `budget`
    /// reports no time left and never sleeps past what remains.
    ///
    /// `budget` returns `None` for "unbounded".
    pub async fn execute_within<F, Fut, T, E, P, B>(
        &self,
        mut operation: F,
        is_retryable: P,
        budget: B,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        B: Fn() -> Option<Duration>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt >= self.max_retries || !is_retryable(&err) {
                        return Err(err);
                    }

                    let mut delay = self.calculate_delay(attempt);
                    if let Some(remaining) = budget() {
                        if remaining.is_zero() {
                            return Err(err);
                        }
                        delay = delay.min(remaining);
                    }

                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying store call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
