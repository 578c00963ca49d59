//! In-crate test doubles for repositories and counter stores.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};

use crate::{
    Error, NewUser, User, UserId,
    error::{BootstrapError, StorageError},
    repositories::{CounterStore, LoginLogRepository, UserRepository},
    storage::{
        Attempt, CounterSnapshot, FailureKey, KeyKind, LastLogin, LastLoginRecord, LoggedAttempt,
    },
};

pub(crate) struct MockUserRepository {
    users: Mutex<HashMap<UserId, User>>,
}

impl MockUserRepository {
    pub(crate) fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, login: &str, password: &str) -> User {
        let new_user = NewUser::builder()
            .login(login)
            .password(password)
            .build()
            .unwrap();
        self.create(new_user).await.unwrap()
    }

    pub(crate) fn remove(&self, id: UserId) {
        self.users.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        let mut users = self.users.lock().unwrap();
        let user = User {
            id: UserId::new(users.len() as i64 + 1),
            login: user.login,
            password_hash: user.password_hash,
            salt: user.salt,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Error> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|user| user.login == login)
            .cloned())
    }
}

/// Login log kept in a vector. Ids listed in `malformed` replay as malformed entries.
pub(crate) struct MockLoginLogRepository {
    entries: Mutex<Vec<LoggedAttempt>>,
    malformed: Mutex<HashSet<i64>>,
}

impl MockLoginLogRepository {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            malformed: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn mark_malformed(&self, id: i64) {
        self.malformed.lock().unwrap().insert(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn matches(key: &FailureKey, attempt: &Attempt) -> bool {
        match key {
            FailureKey::User(id) => attempt.user_id == Some(*id),
            FailureKey::Address(address) => attempt.origin_address == *address,
        }
    }
}

#[async_trait]
impl LoginLogRepository for MockLoginLogRepository {
    async fn append(&self, attempt: &Attempt) -> Result<LoggedAttempt, Error> {
        let mut entries = self.entries.lock().unwrap();
        let logged = LoggedAttempt {
            id: entries.len() as i64 + 1,
            attempt: attempt.clone(),
        };
        entries.push(logged.clone());
        Ok(logged)
    }

    async fn failures_since_last_success(&self, key: &FailureKey) -> Result<u64, Error> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .filter(|entry| Self::matches(key, entry))
            .take_while(|entry| !entry.succeeded)
            .count() as u64)
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let entries = self.entries.lock().unwrap();
        let mut counts: BTreeMap<FailureKey, u64> = BTreeMap::new();
        for entry in entries.iter() {
            let key = match kind {
                KeyKind::User => match entry.user_id {
                    Some(id) => FailureKey::user(id),
                    None => continue,
                },
                KeyKind::Address => FailureKey::address(entry.origin_address.clone()),
            };
            let count = counts.entry(key).or_insert(0);
            if entry.succeeded {
                *count = 0;
            } else {
                *count += 1;
            }
        }
        Ok(counts.into_iter().filter(|(_, count)| *count > 0).collect())
    }

    async fn last_logins(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        let entries = self.entries.lock().unwrap();
        let mut successes = entries
            .iter()
            .rev()
            .filter(|entry| entry.succeeded && entry.user_id == Some(user_id))
            .map(|entry| LastLogin {
                address: entry.origin_address.clone(),
                at: entry.created_at,
            });
        Ok(successes.next().map(|current| LastLoginRecord {
            current,
            previous: successes.next(),
        }))
    }

    fn replay(&self) -> BoxStream<'_, Result<LoggedAttempt, Error>> {
        let entries = self.entries.lock().unwrap().clone();
        let malformed = self.malformed.lock().unwrap().clone();
        futures::stream::iter(entries.into_iter().map(move |entry| {
            if malformed.contains(&entry.id) {
                Err(Error::Bootstrap(BootstrapError::MalformedEntry {
                    id: entry.id,
                    reason: "unreadable row".to_string(),
                }))
            } else {
                Ok(entry)
            }
        }))
        .boxed()
    }
}

/// Login log that stalls after appending attempts for one login, as a slow database
/// acknowledging a write late would.
pub(crate) struct SlowLoginLog {
    inner: MockLoginLogRepository,
    slow_login: String,
    delay: Duration,
}

impl SlowLoginLog {
    pub(crate) fn new(slow_login: &str, delay: Duration) -> Self {
        Self {
            inner: MockLoginLogRepository::new(),
            slow_login: slow_login.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl LoginLogRepository for SlowLoginLog {
    async fn append(&self, attempt: &Attempt) -> Result<LoggedAttempt, Error> {
        let logged = self.inner.append(attempt).await?;
        if attempt.login == self.slow_login {
            tokio::time::sleep(self.delay).await;
        }
        Ok(logged)
    }

    async fn failures_since_last_success(&self, key: &FailureKey) -> Result<u64, Error> {
        self.inner.failures_since_last_success(key).await
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        self.inner.failure_counts(kind).await
    }

    async fn last_logins(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        self.inner.last_logins(user_id).await
    }

    fn replay(&self) -> BoxStream<'_, Result<LoggedAttempt, Error>> {
        self.inner.replay()
    }
}

/// Counter store whose every call fails as if the server went away.
pub(crate) struct UnavailableCounterStore;

fn unavailable<T>() -> Result<T, Error> {
    Err(Error::Storage(StorageError::Unavailable(
        "connection refused".to_string(),
    )))
}

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn increment(&self, _key: &FailureKey) -> Result<u64, Error> {
        unavailable()
    }

    async fn reset(&self, _key: &FailureKey) -> Result<(), Error> {
        unavailable()
    }

    async fn get(&self, _key: &FailureKey) -> Result<u64, Error> {
        unavailable()
    }

    async fn scan(&self, _kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        unavailable()
    }

    async fn shift_last_login(&self, _user_id: UserId, _login: LastLogin) -> Result<(), Error> {
        unavailable()
    }

    async fn last_login(&self, _user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        unavailable()
    }

    async fn replace_all(&self, _snapshot: CounterSnapshot) -> Result<(), Error> {
        unavailable()
    }

    async fn health_check(&self) -> Result<(), Error> {
        unavailable()
    }
}

/// Counter store whose calls never complete.
pub(crate) struct StalledCounterStore;

#[async_trait]
impl CounterStore for StalledCounterStore {
    async fn increment(&self, _key: &FailureKey) -> Result<u64, Error> {
        std::future::pending().await
    }

    async fn reset(&self, _key: &FailureKey) -> Result<(), Error> {
        std::future::pending().await
    }

    async fn get(&self, _key: &FailureKey) -> Result<u64, Error> {
        std::future::pending().await
    }

    async fn scan(&self, _kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        std::future::pending().await
    }

    async fn shift_last_login(&self, _user_id: UserId, _login: LastLogin) -> Result<(), Error> {
        std::future::pending().await
    }

    async fn last_login(&self, _user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        std::future::pending().await
    }

    async fn replace_all(&self, _snapshot: CounterSnapshot) -> Result<(), Error> {
        std::future::pending().await
    }

    async fn health_check(&self) -> Result<(), Error> {
        std::future::pending().await
    }
}
