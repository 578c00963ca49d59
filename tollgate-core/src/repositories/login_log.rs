//! Repository trait for the login event log.
//!
//! The login log is the authoritative, append-only record of every attempt. The
//! log-derived failure tracker answers every question straight from it, and the
//! bootstrap procedure replays it to rebuild counter caches.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    Error, UserId,
    storage::{Attempt, FailureKey, KeyKind, LastLoginRecord, LoggedAttempt},
};

/// Repository for the login event log.
///
/// # Consistency
///
/// `failures_since_last_success` and `failure_counts` must each be computed from a
/// single consistent read of the log. Looking up the id of the last success and
/// counting the failures after it in two separate reads lets a concurrent append
/// slip in between and produce a stale count.
#[async_trait]
pub trait LoginLogRepository: Send + Sync + 'static {
    /// Append an attempt and return it with its log-assigned id.
    async fn append(&self, attempt: &Attempt) -> Result<LoggedAttempt, Error>;

    /// Count the failed entries for `key` after its most recent successful entry.
    ///
    /// Returns zero for keys the log has never seen.
    async fn failures_since_last_success(&self, key: &FailureKey) -> Result<u64, Error>;

    /// The non-zero failure counts of every key of a kind.
    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error>;

    /// The two most recent successful logins of a user.
    async fn last_logins(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error>;

    /// Stream every entry in append order.
    ///
    /// Entries that cannot be represented as an [`Attempt`] surface as
    /// [`BootstrapError::MalformedEntry`](crate::error::BootstrapError::MalformedEntry)
    /// items rather than ending the stream early.
    fn replay(&self) -> BoxStream<'_, Result<LoggedAttempt, Error>>;
}
