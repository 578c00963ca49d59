//! Rebuilding counter caches from the login log.
//!
//! The cache-backed tracker starts empty. Before it serves traffic, the whole login log is
//! replayed in id order through the same mutation rules live recording uses, and the
//! result is installed in the counter store in one step.

use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use serde::Serialize;

use crate::{
    Error,
    error::BootstrapError,
    repositories::{CounterStore, LoginLogRepository},
    storage::{CounterSnapshot, LoggedAttempt},
};

/// What a bootstrap run installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    /// Log entries replayed
    pub entries: u64,
    /// Non-zero failure counters installed
    pub failure_counters: usize,
    /// Users with a last-login record
    pub last_login_records: usize,
}

pub struct BootstrapService<L: LoginLogRepository, C: CounterStore + ?Sized> {
    login_log: Arc<L>,
    store: Arc<C>,
}

impl<L: LoginLogRepository, C: CounterStore + ?Sized> BootstrapService<L, C> {
    pub fn new(login_log: Arc<L>, store: Arc<C>) -> Self {
        Self { login_log, store }
    }

    /// Replay the login log and replace the counter store's content with the result.
    ///
    /// The log is only read. Nothing is written to the counter store unless the entire
    /// log replayed cleanly: a malformed or out-of-order entry aborts the run and leaves
    /// the previous cache content in place. Running twice over an unchanged log installs
    /// identical state.
    pub async fn run(&self) -> Result<BootstrapSummary, Error> {
        let started = Instant::now();
        tracing::info!("Replaying login log into counter store");

        let (snapshot, entries) = self.replay().await?;
        let summary = BootstrapSummary {
            entries,
            failure_counters: snapshot.failures.len(),
            last_login_records: snapshot.last_logins.len(),
        };

        self.store.replace_all(snapshot).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to install rebuilt counters");
        })?;

        tracing::info!(
            entries = summary.entries,
            failure_counters = summary.failure_counters,
            last_login_records = summary.last_login_records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Counter store bootstrapped"
        );
        Ok(summary)
    }

    /// Fold the whole log into a snapshot without touching the store.
    async fn replay(&self) -> Result<(CounterSnapshot, u64), Error> {
        let mut snapshot = CounterSnapshot::new();
        let mut previous_id: Option<i64> = None;
        let mut entries = 0u64;

        let mut stream = self.login_log.replay();
        while let Some(entry) = stream.next().await {
            let entry = entry.inspect_err(|e| {
                tracing::error!(error = %e, after_id = ?previous_id, "Aborting bootstrap on unreadable log entry");
            })?;

            if let Some(previous) = previous_id {
                if entry.id <= previous {
                    tracing::error!(previous, id = entry.id, "Aborting bootstrap on out-of-order log entry");
                    return Err(BootstrapError::OutOfOrder {
                        previous,
                        id: entry.id,
                    }
                    .into());
                }
            }
            validate(&entry).inspect_err(|e| {
                tracing::error!(id = entry.id, error = %e, "Aborting bootstrap on malformed log entry");
            })?;

            snapshot.apply(&entry);
            previous_id = Some(entry.id);
            entries += 1;
        }

        Ok((snapshot, entries))
    }
}

fn validate(entry: &LoggedAttempt) -> Result<(), BootstrapError> {
    if entry.origin_address.trim().is_empty() {
        return Err(BootstrapError::MalformedEntry {
            id: entry.id,
            reason: "empty origin address".to_string(),
        });
    }
    Ok(())
}
