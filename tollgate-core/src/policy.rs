//! Lockout thresholds and the verdicts derived from them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FailureKey, KeyKind, User, error::ValidationError};

/// Process-wide lockout policy.
///
/// Thresholds are cumulative failure counts since the last success of a key, not rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// A user is locked once this many consecutive failures were recorded for them
    pub user_lock_threshold: u64,
    /// An address is banned once this many consecutive failures came from it
    pub ip_ban_threshold: u64,
    /// Upper bound on the latency of every counter or log store call
    pub store_timeout: Duration,
    /// Deny as banned when the ban check itself cannot reach the store
    pub fail_closed_on_ban_check: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            user_lock_threshold: 3,
            ip_ban_threshold: 10,
            store_timeout: Duration::from_secs(2),
            fail_closed_on_ban_check: false,
        }
    }
}

impl PolicyConfig {
    /// Create a policy with the given thresholds and default store settings.
    pub fn new(user_lock_threshold: u64, ip_ban_threshold: u64) -> Result<Self, ValidationError> {
        Self {
            user_lock_threshold,
            ip_ban_threshold,
            ..Self::default()
        }
        .validated()
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed_on_ban_check = fail_closed;
        self
    }

    /// Check that thresholds are positive and the timeout is non-zero.
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.user_lock_threshold == 0 {
            return Err(ValidationError::InvalidThreshold(
                "user lock threshold must be positive".to_string(),
            ));
        }
        if self.ip_ban_threshold == 0 {
            return Err(ValidationError::InvalidThreshold(
                "ip ban threshold must be positive".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(ValidationError::InvalidThreshold(
                "store timeout must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn threshold(&self, kind: KeyKind) -> u64 {
        match kind {
            KeyKind::User => self.user_lock_threshold,
            KeyKind::Address => self.ip_ban_threshold,
        }
    }

    /// Whether a counter value for `key` is at or above its threshold.
    pub fn is_over_threshold(&self, key: &FailureKey, failures: u64) -> bool {
        failures >= self.threshold(key.kind())
    }

    pub fn is_locked(&self, failures: u64) -> bool {
        failures >= self.user_lock_threshold
    }

    pub fn is_banned(&self, failures: u64) -> bool {
        failures >= self.ip_ban_threshold
    }
}

/// Outcome of the pre-authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allowed,
    Banned,
    Locked,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Result of [`LockoutService::evaluate_attempt`](crate::services::LockoutService::evaluate_attempt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub matched_user: Option<User>,
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        self.verdict.is_allowed()
    }

    pub fn matched_user_id(&self) -> Option<crate::UserId> {
        self.matched_user.as_ref().map(|user| user.id)
    }
}

/// Result of a complete login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Succeeded(User),
    Banned,
    Locked,
    WrongPassword,
    WrongLogin,
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Succeeded(_))
    }

    /// Message suitable for showing to the person at the login form.
    pub fn notice(&self) -> &'static str {
        match self {
            LoginOutcome::Succeeded(_) => "Logged in",
            LoginOutcome::Banned => "You're banned.",
            LoginOutcome::Locked => "This account is locked.",
            LoginOutcome::WrongPassword | LoginOutcome::WrongLogin => {
                "Wrong username or password"
            }
        }
    }
}
