//! Per-operation deadlines.
//!
//! A [`TimeoutContext`] is created once per logical operation (one `get`,
//! one marker read) and consulted before every store call issued on its
//! behalf. Time is read through an injectable [`Clock`] so deadline
//! behaviour can be tested without sleeping.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = chrono::Duration::from_std(by)
            .ok()
            .and_then(|by| now.checked_add_signed(by))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deadline for one logical operation.
#[derive(Debug, Clone)]
pub struct TimeoutContext {
    name: String,
    expiry: DateTime<Utc>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl TimeoutContext {
    /// Starts a context expiring `timeout` from the clock's current time.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        let start = clock.now();
        let expiry = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|t| start.checked_add_signed(t))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            name: name.into(),
            expiry,
            timeout,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// True once the clock has moved past the expiry.
    pub fn is_expired(&self) -> bool {
        self.clock.now() > self.expiry
    }

    /// Budget left before expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expiry - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Fails with [`StorageError::Timeout`] if the deadline has passed.
    pub fn check(&self) -> StorageResult<()> {
        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    /// Runs `fut` if the deadline has not passed, bounded by the remaining budget.
    pub async fn run<T, F>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.check()?;
        match tokio::time::timeout(self.remaining(), fut).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }

    pub fn timeout_error(&self) -> StorageError {
        StorageError::Timeout {
            operation: self.name.clone(),
            timeout: self.timeout,
        }
    }
}
