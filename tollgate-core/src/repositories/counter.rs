//! Repository trait for counter caches.

use async_trait::async_trait;

use crate::{
    Error, UserId,
    storage::{CounterSnapshot, FailureKey, KeyKind, LastLogin, LastLoginRecord},
};

/// Key/value cache of failure counters and last-login records.
///
/// Every single-key operation must be atomic with respect to other operations on
/// the same key: two concurrent increments must both land. Operations on different
/// keys must not serialize on a shared lock.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Add one to a counter, creating it at one if absent. Returns the new value.
    async fn increment(&self, key: &FailureKey) -> Result<u64, Error>;

    /// Remove a counter. Absent counters are left absent.
    async fn reset(&self, key: &FailureKey) -> Result<(), Error>;

    /// Read a counter; absent counters read as zero.
    async fn get(&self, key: &FailureKey) -> Result<u64, Error>;

    /// Enumerate every counter of a kind, including stale zero entries if the
    /// backend keeps them.
    async fn scan(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error>;

    /// Record a successful login, moving the current record to `previous`.
    async fn shift_last_login(&self, user_id: UserId, login: LastLogin) -> Result<(), Error>;

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error>;

    /// Drop every entry and install `snapshot` in its place.
    async fn replace_all(&self, snapshot: CounterSnapshot) -> Result<(), Error>;

    async fn health_check(&self) -> Result<(), Error>;
}
