//! Failure tracking strategies
//!
//! The lockout engine asks a [`FailureTracker`] how many consecutive failures a key has and
//! tells it about every attempt appended to the login log. Two strategies exist:
//!
//! - [`LogDerivedTracker`] keeps no state of its own and answers straight from the login log.
//! - [`CachedTracker`] keeps counters in a [`CounterStore`] and must be bootstrapped from the
//!   log before it serves traffic.
//!
//! The strategy is picked once at startup and shared as `Arc<dyn FailureTracker>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Error, UserId,
    repositories::{CounterStore, LoginLogRepository},
    storage::{CounterMutation, FailureKey, KeyKind, LastLoginRecord, LoggedAttempt},
};

/// Which strategy a tracker implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    LogDerived,
    Cached,
}

impl Backend {
    /// Cached trackers start empty and have to be rebuilt from the log.
    pub fn requires_bootstrap(&self) -> bool {
        matches!(self, Backend::Cached)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::LogDerived => f.write_str("log-derived"),
            Backend::Cached => f.write_str("cached"),
        }
    }
}

/// Source of consecutive-failure counts.
///
/// Implementations must give identical answers for the same login log: a bootstrapped
/// cached tracker and a log-derived tracker are interchangeable.
#[async_trait]
pub trait FailureTracker: Send + Sync {
    fn backend(&self) -> Backend;

    /// Failures of `key` since its last success. Unknown keys have zero.
    async fn failure_count(&self, key: &FailureKey) -> Result<u64, Error>;

    /// Every key of a kind with a non-zero failure count.
    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error>;

    /// Account for an attempt that was just appended to the login log.
    async fn record(&self, attempt: &LoggedAttempt) -> Result<(), Error>;

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

/// Tracker that derives every answer from the login log.
pub struct LogDerivedTracker<L: LoginLogRepository> {
    login_log: Arc<L>,
}

impl<L: LoginLogRepository> LogDerivedTracker<L> {
    pub fn new(login_log: Arc<L>) -> Self {
        Self { login_log }
    }
}

#[async_trait]
impl<L: LoginLogRepository> FailureTracker for LogDerivedTracker<L> {
    fn backend(&self) -> Backend {
        Backend::LogDerived
    }

    async fn failure_count(&self, key: &FailureKey) -> Result<u64, Error> {
        self.login_log.failures_since_last_success(key).await
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let counts = self.login_log.failure_counts(kind).await?;
        Ok(counts.into_iter().filter(|(_, count)| *count > 0).collect())
    }

    // The appended log entry already is the state.
    async fn record(&self, _attempt: &LoggedAttempt) -> Result<(), Error> {
        Ok(())
    }

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        self.login_log.last_logins(user_id).await
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Tracker backed by a counter cache.
pub struct CachedTracker<C: CounterStore + ?Sized> {
    store: Arc<C>,
}

impl<C: CounterStore + ?Sized> CachedTracker<C> {
    pub fn new(store: Arc<C>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }
}

#[async_trait]
impl<C: CounterStore + ?Sized> FailureTracker for CachedTracker<C> {
    fn backend(&self) -> Backend {
        Backend::Cached
    }

    async fn failure_count(&self, key: &FailureKey) -> Result<u64, Error> {
        self.store.get(key).await
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let counts = self.store.scan(kind).await?;
        Ok(counts.into_iter().filter(|(_, count)| *count > 0).collect())
    }

    /// Apply the attempt's mutations one key at a time.
    ///
    /// Each mutation is atomic on its own key. A failure part way through leaves the
    /// earlier mutations committed.
    async fn record(&self, attempt: &LoggedAttempt) -> Result<(), Error> {
        for mutation in attempt.mutations() {
            match mutation {
                CounterMutation::Increment(key) => {
                    let count = self.store.increment(&key).await?;
                    tracing::trace!(key = %key, count, "Incremented failure counter");
                }
                CounterMutation::Reset(key) => {
                    self.store.reset(&key).await?;
                    tracing::trace!(key = %key, "Reset failure counter");
                }
                CounterMutation::ShiftLastLogin(user_id, login) => {
                    self.store.shift_last_login(user_id, login).await?;
                }
            }
        }
        Ok(())
    }

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        self.store.last_login(user_id).await
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.store.health_check().await
    }
}
