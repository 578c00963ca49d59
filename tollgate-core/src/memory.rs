//! In-process counter store.
//!
//! Suitable for a single process guarding its own logins, and for tests. Counters live in
//! [`DashMap`]s, whose per-shard locking gives each key atomic read-modify-write without a
//! global lock. The maps sit behind an [`RwLock`] only so a rebuild can swap in a complete
//! replacement at once.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::{
    Error, UserId,
    repositories::CounterStore,
    storage::{CounterSnapshot, FailureKey, KeyKind, LastLogin, LastLoginRecord},
};

#[derive(Debug, Default)]
struct Counters {
    failures: DashMap<FailureKey, u64>,
    last_logins: DashMap<UserId, LastLoginRecord>,
}

impl From<CounterSnapshot> for Counters {
    fn from(snapshot: CounterSnapshot) -> Self {
        Self {
            failures: snapshot
                .failures
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .collect(),
            last_logins: snapshot.last_logins.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<Counters>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current content out.
    pub async fn snapshot(&self) -> CounterSnapshot {
        let counters = self.counters.read().await;
        CounterSnapshot {
            failures: counters
                .failures
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            last_logins: counters
                .last_logins
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &FailureKey) -> Result<u64, Error> {
        let counters = self.counters.read().await;
        let mut count = counters.failures.entry(key.clone()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset(&self, key: &FailureKey) -> Result<(), Error> {
        self.counters.read().await.failures.remove(key);
        Ok(())
    }

    async fn get(&self, key: &FailureKey) -> Result<u64, Error> {
        let counters = self.counters.read().await;
        Ok(counters.failures.get(key).map(|count| *count).unwrap_or(0))
    }

    async fn scan(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let counters = self.counters.read().await;
        Ok(counters
            .failures
            .iter()
            .filter(|entry| entry.key().kind() == kind)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    async fn shift_last_login(&self, user_id: UserId, login: LastLogin) -> Result<(), Error> {
        let counters = self.counters.read().await;
        counters
            .last_logins
            .entry(user_id)
            .and_modify(|record| {
                let current = std::mem::replace(&mut record.current, login.clone());
                record.previous = Some(current);
            })
            .or_insert_with(|| LastLoginRecord::first(login));
        Ok(())
    }

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        let counters = self.counters.read().await;
        Ok(counters
            .last_logins
            .get(&user_id)
            .map(|record| record.value().clone()))
    }

    // Built before taking the write lock, so readers see either the old or the new content.
    async fn replace_all(&self, snapshot: CounterSnapshot) -> Result<(), Error> {
        let replacement = Counters::from(snapshot);
        let _previous = std::mem::replace(&mut *self.counters.write().await, replacement);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
