use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    Error, FailureKey, KeyKind,
    error::utilities::with_timeout,
    policy::PolicyConfig,
    repositories::UserRepository,
    tracker::FailureTracker,
};

/// Addresses and users currently over their thresholds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub banned_ips: BTreeSet<String>,
    pub locked_users: BTreeSet<String>,
}

/// Enumerates banned addresses and locked users for administrators.
///
/// Enumeration walks the active keys of the tracker, so its cost grows with the number
/// of keys that have failures, not with the size of the login log.
pub struct ReportService<U: UserRepository> {
    user_repository: Arc<U>,
    tracker: Arc<dyn FailureTracker>,
    config: PolicyConfig,
}

impl<U: UserRepository> ReportService<U> {
    pub fn new(
        user_repository: Arc<U>,
        tracker: Arc<dyn FailureTracker>,
        config: PolicyConfig,
    ) -> Self {
        Self {
            user_repository,
            tracker,
            config,
        }
    }

    pub async fn list_banned_addresses(&self) -> Result<BTreeSet<String>, Error> {
        let counts = self.scan(KeyKind::Address).await?;
        Ok(counts
            .into_iter()
            .filter_map(|(key, count)| match key {
                FailureKey::Address(address) if self.config.is_banned(count) => Some(address),
                _ => None,
            })
            .collect())
    }

    /// Logins of every locked user.
    ///
    /// Counters for user ids that no longer resolve in the credential store are skipped.
    pub async fn list_locked_users(&self) -> Result<BTreeSet<String>, Error> {
        let counts = self.scan(KeyKind::User).await?;
        let mut locked = BTreeSet::new();

        for (key, count) in counts {
            let FailureKey::User(user_id) = key else {
                continue;
            };
            if !self.config.is_locked(count) {
                continue;
            }
            let user = with_timeout(
                "find_user_by_id",
                self.config.store_timeout,
                self.user_repository.find_by_id(user_id),
            )
            .await?;
            match user {
                Some(user) => {
                    locked.insert(user.login);
                }
                None => {
                    tracing::warn!(user_id = %user_id, failures = count, "Locked user id does not resolve, skipping");
                }
            }
        }

        Ok(locked)
    }

    pub async fn snapshot(&self) -> Result<Report, Error> {
        let report = Report {
            banned_ips: self.list_banned_addresses().await?,
            locked_users: self.list_locked_users().await?,
        };
        tracing::debug!(
            banned_ips = report.banned_ips.len(),
            locked_users = report.locked_users.len(),
            "Built lockout report"
        );
        Ok(report)
    }

    async fn scan(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        with_timeout(
            "scan",
            self.config.store_timeout,
            self.tracker.failure_counts(kind),
        )
        .await
    }
}
