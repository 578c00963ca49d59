use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Namespace of a failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    User,
    Address,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::User => f.write_str("user"),
            KeyKind::Address => f.write_str("ip"),
        }
    }
}

/// Key of a failure counter: a user account or an origin address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum FailureKey {
    User(UserId),
    Address(String),
}

impl FailureKey {
    pub fn user(id: UserId) -> Self {
        FailureKey::User(id)
    }

    pub fn address(address: impl Into<String>) -> Self {
        FailureKey::Address(address.into())
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            FailureKey::User(_) => KeyKind::User,
            FailureKey::Address(_) => KeyKind::Address,
        }
    }
}

impl std::fmt::Display for FailureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKey::User(id) => write!(f, "user:{id}"),
            FailureKey::Address(address) => write!(f, "ip:{address}"),
        }
    }
}

/// A single login attempt as written to the login log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub origin_address: String,
    pub login: String,
    pub user_id: Option<UserId>,
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Create an attempt stamped with the current time.
    pub fn new(
        origin_address: impl Into<String>,
        login: impl Into<String>,
        user_id: Option<UserId>,
        succeeded: bool,
    ) -> Self {
        Self {
            origin_address: origin_address.into(),
            login: login.into(),
            user_id,
            succeeded,
            created_at: Utc::now(),
        }
    }

    /// The counter mutations this attempt implies, address first.
    ///
    /// This is the single definition of how an outcome moves the counters; live
    /// recording and bootstrap replay both apply exactly this list.
    pub fn mutations(&self) -> Vec<CounterMutation> {
        let address = FailureKey::address(self.origin_address.clone());
        let mut mutations = Vec::with_capacity(3);

        if self.succeeded {
            mutations.push(CounterMutation::Reset(address));
            if let Some(user_id) = self.user_id {
                mutations.push(CounterMutation::Reset(FailureKey::user(user_id)));
                mutations.push(CounterMutation::ShiftLastLogin(
                    user_id,
                    LastLogin {
                        address: self.origin_address.clone(),
                        at: self.created_at,
                    },
                ));
            }
        } else {
            mutations.push(CounterMutation::Increment(address));
            if let Some(user_id) = self.user_id {
                mutations.push(CounterMutation::Increment(FailureKey::user(user_id)));
            }
        }

        mutations
    }
}

/// An attempt after it was appended to the login log.
///
/// `id` is assigned by the log and strictly increases in append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedAttempt {
    pub id: i64,
    #[serde(flatten)]
    pub attempt: Attempt,
}

impl std::ops::Deref for LoggedAttempt {
    type Target = Attempt;

    fn deref(&self) -> &Self::Target {
        &self.attempt
    }
}

/// One counter store update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterMutation {
    Increment(FailureKey),
    Reset(FailureKey),
    ShiftLastLogin(UserId, LastLogin),
}

/// Where and when a user last logged in successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastLogin {
    pub address: String,
    pub at: DateTime<Utc>,
}

/// Two-deep successful login history of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastLoginRecord {
    pub current: LastLogin,
    pub previous: Option<LastLogin>,
}

impl LastLoginRecord {
    pub fn first(login: LastLogin) -> Self {
        Self {
            current: login,
            previous: None,
        }
    }

    /// Push a new successful login: `previous` takes the old `current`.
    pub fn shift(record: Option<LastLoginRecord>, login: LastLogin) -> Self {
        match record {
            Some(record) => Self {
                current: login,
                previous: Some(record.current),
            },
            None => Self::first(login),
        }
    }

    /// The login to present as "last session" right after a new login started.
    pub fn last_session(&self) -> &LastLogin {
        self.previous.as_ref().unwrap_or(&self.current)
    }
}

/// Complete content of a counter store, built off-line and installed at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub failures: HashMap<FailureKey, u64>,
    pub last_logins: HashMap<UserId, LastLoginRecord>,
}

impl CounterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an attempt with the same rules as live recording.
    pub fn apply(&mut self, attempt: &Attempt) {
        for mutation in attempt.mutations() {
            match mutation {
                CounterMutation::Increment(key) => {
                    *self.failures.entry(key).or_insert(0) += 1;
                }
                CounterMutation::Reset(key) => {
                    self.failures.remove(&key);
                }
                CounterMutation::ShiftLastLogin(user_id, login) => {
                    let record = self.last_logins.remove(&user_id);
                    self.last_logins
                        .insert(user_id, LastLoginRecord::shift(record, login));
                }
            }
        }
    }

    pub fn failure_count(&self, key: &FailureKey) -> u64 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.last_logins.is_empty()
    }
}
