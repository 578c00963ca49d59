//! Lockout policy engine.
//!
//! Decides whether a login attempt may proceed and records its outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_core::services::LockoutService;
//!
//! let service = LockoutService::new(users, login_log, tracker, PolicyConfig::default());
//!
//! let evaluation = service.evaluate_attempt("alice", "192.168.1.1").await?;
//! if evaluation.is_allowed() {
//!     // verify credentials, then
//!     service.record_outcome("192.168.1.1", "alice", true, evaluation.matched_user_id()).await?;
//! }
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Error, FailureKey, User, UserId,
    error::{ValidationError, utilities::with_timeout},
    policy::{Evaluation, LoginOutcome, PolicyConfig, Verdict},
    repositories::{LoginLogRepository, UserRepository},
    storage::{Attempt, LastLogin, LoggedAttempt},
    tracker::FailureTracker,
};

/// Service deciding lockouts from consecutive failure counts.
///
/// # Thread Safety
///
/// Shareable across tasks. `record_outcome` calls touching the same key are serialized,
/// so counters change in the order the login log assigned, but `evaluate_attempt`
/// followed by `record_outcome` is not one transaction: two requests racing past the
/// check may both proceed before either failure lands.
pub struct LockoutService<U: UserRepository, L: LoginLogRepository> {
    user_repository: Arc<U>,
    login_log: Arc<L>,
    tracker: Arc<dyn FailureTracker>,
    config: PolicyConfig,
    key_locks: DashMap<FailureKey, Arc<Mutex<()>>>,
}

impl<U: UserRepository, L: LoginLogRepository> LockoutService<U, L> {
    pub fn new(
        user_repository: Arc<U>,
        login_log: Arc<L>,
        tracker: Arc<dyn FailureTracker>,
        config: PolicyConfig,
    ) -> Self {
        Self {
            user_repository,
            login_log,
            tracker,
            config,
            key_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<dyn FailureTracker> {
        &self.tracker
    }

    /// Check whether an attempt for `login` from `origin_address` may proceed.
    ///
    /// The address ban is checked before the user lock, so a banned address is reported
    /// as banned whether or not the login names a real or locked user. An unknown login
    /// is allowed through; the caller will then fail it as a wrong login.
    ///
    /// # Errors
    ///
    /// Store failures propagate, except that an unreachable store during the ban check
    /// yields [`Verdict::Banned`] when `fail_closed_on_ban_check` is set.
    pub async fn evaluate_attempt(
        &self,
        login: &str,
        origin_address: &str,
    ) -> Result<Evaluation, Error> {
        let timeout = self.config.store_timeout;
        let matched_user = with_timeout(
            "find_user_by_login",
            timeout,
            self.user_repository.find_by_login(login),
        )
        .await?;

        let address_key = FailureKey::address(origin_address);
        let address_failures = match with_timeout(
            "ban_check",
            timeout,
            self.tracker.failure_count(&address_key),
        )
        .await
        {
            Ok(failures) => failures,
            Err(e) if e.is_store_unavailable() && self.config.fail_closed_on_ban_check => {
                tracing::warn!(
                    origin_address,
                    error = %e,
                    "Ban check could not reach the store, denying attempt"
                );
                return Ok(Evaluation {
                    verdict: Verdict::Banned,
                    matched_user,
                });
            }
            Err(e) => return Err(e),
        };

        if self.config.is_banned(address_failures) {
            tracing::debug!(origin_address, failures = address_failures, "Address is banned");
            return Ok(Evaluation {
                verdict: Verdict::Banned,
                matched_user,
            });
        }

        if let Some(user) = &matched_user {
            let user_failures = with_timeout(
                "lock_check",
                timeout,
                self.tracker.failure_count(&FailureKey::user(user.id)),
            )
            .await?;
            if self.config.is_locked(user_failures) {
                tracing::debug!(user_id = %user.id, failures = user_failures, "User is locked");
                return Ok(Evaluation {
                    verdict: Verdict::Locked,
                    matched_user,
                });
            }
        }

        Ok(Evaluation {
            verdict: Verdict::Allowed,
            matched_user,
        })
    }

    /// Append the outcome of an attempt to the login log and update the counters.
    ///
    /// A success resets the address counter and, for a matched user, the user counter
    /// and last-login record. A failure increments the address counter and, for a
    /// matched user, the user counter.
    pub async fn record_outcome(
        &self,
        origin_address: &str,
        login: &str,
        succeeded: bool,
        matched_user_id: Option<UserId>,
    ) -> Result<LoggedAttempt, Error> {
        if origin_address.trim().is_empty() {
            return Err(ValidationError::InvalidAddress(
                "origin address must not be empty".to_string(),
            )
            .into());
        }

        let mut keys = vec![FailureKey::address(origin_address)];
        keys.extend(matched_user_id.map(FailureKey::user));

        let timeout = self.config.store_timeout;
        let attempt = Attempt::new(origin_address, login, matched_user_id, succeeded);

        // The append and the counter update must not interleave with another attempt on
        // the same key, or the counters stop following log order.
        let guards = self.lock_keys(&keys).await;
        let recorded = async {
            let logged =
                with_timeout("append_attempt", timeout, self.login_log.append(&attempt)).await?;
            with_timeout("record_attempt", timeout, self.tracker.record(&logged)).await?;
            Ok::<_, Error>(logged)
        }
        .await;
        drop(guards);
        self.release_keys(&keys);
        let logged = recorded?;

        tracing::debug!(
            id = logged.id,
            origin_address,
            user_id = ?matched_user_id,
            succeeded,
            "Recorded login attempt"
        );
        Ok(logged)
    }

    pub async fn is_locked(&self, user_id: UserId) -> Result<bool, Error> {
        let failures = self.failure_count(&FailureKey::user(user_id)).await?;
        Ok(self.config.is_locked(failures))
    }

    pub async fn is_banned(&self, origin_address: &str) -> Result<bool, Error> {
        let failures = self
            .failure_count(&FailureKey::address(origin_address))
            .await?;
        Ok(self.config.is_banned(failures))
    }

    /// Raw consecutive-failure count of a key.
    pub async fn failure_count(&self, key: &FailureKey) -> Result<u64, Error> {
        with_timeout(
            "failure_count",
            self.config.store_timeout,
            self.tracker.failure_count(key),
        )
        .await
    }

    /// Run a complete login: check, verify the password, record.
    ///
    /// A denied attempt is itself recorded as a failure, so hammering a banned address or
    /// locked account keeps its counter climbing.
    pub async fn attempt_login(
        &self,
        login: &str,
        password: &str,
        origin_address: &str,
    ) -> Result<LoginOutcome, Error> {
        let evaluation = self.evaluate_attempt(login, origin_address).await?;
        let matched_user_id = evaluation.matched_user_id();

        match evaluation.verdict {
            Verdict::Banned => {
                self.record_denial(origin_address, login, matched_user_id)
                    .await?;
                return Ok(LoginOutcome::Banned);
            }
            Verdict::Locked => {
                self.record_denial(origin_address, login, matched_user_id)
                    .await?;
                return Ok(LoginOutcome::Locked);
            }
            Verdict::Allowed => {}
        }

        let Some(user) = evaluation.matched_user else {
            self.record_outcome(origin_address, login, false, None)
                .await?;
            return Ok(LoginOutcome::WrongLogin);
        };

        if user.check_password(password)? {
            self.record_outcome(origin_address, login, true, Some(user.id))
                .await?;
            tracing::info!(user_id = %user.id, origin_address, "Login succeeded");
            Ok(LoginOutcome::Succeeded(user))
        } else {
            self.record_outcome(origin_address, login, false, Some(user.id))
                .await?;
            Ok(LoginOutcome::WrongPassword)
        }
    }

    /// The session to show a user who just logged in: their previous successful login if
    /// there is one, otherwise the current one.
    pub async fn last_login(&self, user_id: UserId) -> Result<Option<LastLogin>, Error> {
        let record = with_timeout(
            "last_login",
            self.config.store_timeout,
            self.tracker.last_login(user_id),
        )
        .await?;
        Ok(record.map(|record| record.last_session().clone()))
    }

    /// Look up a user by login through the credential store.
    pub async fn find_user(&self, login: &str) -> Result<Option<User>, Error> {
        with_timeout(
            "find_user_by_login",
            self.config.store_timeout,
            self.user_repository.find_by_login(login),
        )
        .await
    }

    /// Lock every key in ascending order so overlapping attempts cannot deadlock.
    async fn lock_keys(&self, keys: &[FailureKey]) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered: Vec<&FailureKey> = keys.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let lock = self.key_locks.entry(key.clone()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    // Drop locks nobody else is holding or waiting on.
    fn release_keys(&self, keys: &[FailureKey]) {
        for key in keys {
            self.key_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    // A denial stands even when its failure cannot be written.
    async fn record_denial(
        &self,
        origin_address: &str,
        login: &str,
        matched_user_id: Option<UserId>,
    ) -> Result<(), Error> {
        match self
            .record_outcome(origin_address, login, false, matched_user_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_store_unavailable() => {
                tracing::warn!(origin_address, error = %e, "Could not record denied attempt");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CachedTracker, KeyKind, LogDerivedTracker, MemoryCounterStore,
        error::StorageError,
        repositories::CounterStore,
        testing::{
            MockLoginLogRepository, MockUserRepository, SlowLoginLog, StalledCounterStore,
            UnavailableCounterStore,
        },
    };
    use std::time::Duration;

    type Service = LockoutService<MockUserRepository, MockLoginLogRepository>;

    struct Fixture {
        users: Arc<MockUserRepository>,
        log: Arc<MockLoginLogRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                users: Arc::new(MockUserRepository::new()),
                log: Arc::new(MockLoginLogRepository::new()),
            }
        }

        fn log_derived(&self, config: PolicyConfig) -> Service {
            let tracker = Arc::new(LogDerivedTracker::new(self.log.clone()));
            LockoutService::new(self.users.clone(), self.log.clone(), tracker, config)
        }

        fn cached(&self, store: Arc<dyn CounterStore>, config: PolicyConfig) -> Service {
            let tracker = Arc::new(CachedTracker::new(store));
            LockoutService::new(self.users.clone(), self.log.clone(), tracker, config)
        }

        /// One service per backend sharing this fixture's users and log.
        fn both(&self, config: PolicyConfig) -> Vec<Service> {
            vec![
                self.log_derived(config.clone()),
                self.cached(Arc::new(MemoryCounterStore::new()), config),
            ]
        }
    }

    fn policy() -> PolicyConfig {
        PolicyConfig::new(3, 10).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_login_is_allowed() {
        let fixture = Fixture::new();
        for service in fixture.both(policy()) {
            let evaluation = service.evaluate_attempt("nobody", "1.2.3.4").await.unwrap();
            assert_eq!(evaluation.verdict, Verdict::Allowed);
            assert!(evaluation.matched_user.is_none());
        }
    }

    #[tokio::test]
    async fn test_lock_after_threshold_and_reset_on_success() {
        for backend in 0..2 {
            let fixture = Fixture::new();
            let alice = fixture.users.insert("alice", "correct").await;
            let service = fixture.both(policy()).remove(backend);

            for _ in 0..3 {
                let outcome = service
                    .attempt_login("alice", "wrong", "1.2.3.4")
                    .await
                    .unwrap();
                assert_eq!(outcome, LoginOutcome::WrongPassword);
            }
            assert!(service.is_locked(alice.id).await.unwrap());

            // Correct password no longer helps, from any address
            let outcome = service
                .attempt_login("alice", "correct", "1.2.3.4")
                .await
                .unwrap();
            assert_eq!(outcome, LoginOutcome::Locked);
            let evaluation = service.evaluate_attempt("alice", "5.6.7.8").await.unwrap();
            assert_eq!(evaluation.verdict, Verdict::Locked);

            // A success recorded out of band unlocks
            service
                .record_outcome("5.6.7.8", "alice", true, Some(alice.id))
                .await
                .unwrap();
            assert!(!service.is_locked(alice.id).await.unwrap());
            assert_eq!(
                service
                    .failure_count(&FailureKey::user(alice.id))
                    .await
                    .unwrap(),
                0
            );

            // Two more failures stay under the threshold, the third locks again
            for _ in 0..2 {
                service
                    .record_outcome("5.6.7.8", "alice", false, Some(alice.id))
                    .await
                    .unwrap();
            }
            assert!(!service.is_locked(alice.id).await.unwrap());
            service
                .record_outcome("5.6.7.8", "alice", false, Some(alice.id))
                .await
                .unwrap();
            assert!(service.is_locked(alice.id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_ban_precedes_lock() {
        for backend in 0..2 {
            let fixture = Fixture::new();
            let bob = fixture.users.insert("bob", "pw").await;
            let service = fixture.both(policy()).remove(backend);

            for i in 0..10 {
                service
                    .record_outcome("9.9.9.9", &format!("ghost{i}"), false, None)
                    .await
                    .unwrap();
            }
            assert!(service.is_banned("9.9.9.9").await.unwrap());
            assert!(!service.is_locked(bob.id).await.unwrap());

            let evaluation = service.evaluate_attempt("bob", "9.9.9.9").await.unwrap();
            assert_eq!(evaluation.verdict, Verdict::Banned);
            assert_eq!(evaluation.matched_user_id(), Some(bob.id));

            let outcome = service.attempt_login("bob", "pw", "9.9.9.9").await.unwrap();
            assert_eq!(outcome, LoginOutcome::Banned);
            assert_eq!(outcome.notice(), "You're banned.");

            // Bob is fine from elsewhere, though the denied attempt counted against him
            assert_eq!(
                service.failure_count(&FailureKey::user(bob.id)).await.unwrap(),
                1
            );
            let outcome = service.attempt_login("bob", "pw", "1.1.1.1").await.unwrap();
            assert!(outcome.is_success());
        }
    }

    #[tokio::test]
    async fn test_attempt_login_outcomes_and_log() {
        let fixture = Fixture::new();
        fixture.users.insert("carol", "pw").await;
        let service = fixture.log_derived(policy());

        assert_eq!(
            service.attempt_login("mallory", "pw", "1.1.1.1").await.unwrap(),
            LoginOutcome::WrongLogin
        );
        assert_eq!(
            service.attempt_login("carol", "nope", "1.1.1.1").await.unwrap(),
            LoginOutcome::WrongPassword
        );
        let outcome = service.attempt_login("carol", "pw", "1.1.1.1").await.unwrap();
        match outcome {
            LoginOutcome::Succeeded(user) => assert_eq!(user.login, "carol"),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(fixture.log.len(), 3);
        assert!(!service.is_banned("1.1.1.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_last_login_shows_previous_session() {
        for backend in 0..2 {
            let fixture = Fixture::new();
            let dave = fixture.users.insert("dave", "pw").await;
            let service = fixture.both(policy()).remove(backend);

            assert!(service.last_login(dave.id).await.unwrap().is_none());

            service.attempt_login("dave", "pw", "1.1.1.1").await.unwrap();
            let last = service.last_login(dave.id).await.unwrap().unwrap();
            assert_eq!(last.address, "1.1.1.1");

            service.attempt_login("dave", "pw", "2.2.2.2").await.unwrap();
            let last = service.last_login(dave.id).await.unwrap().unwrap();
            assert_eq!(last.address, "1.1.1.1");
        }
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_interfere() {
        let fixture = Fixture::new();
        let erin = fixture.users.insert("erin", "pw").await;
        let frank = fixture.users.insert("frank", "pw").await;
        let service = Arc::new(fixture.cached(Arc::new(MemoryCounterStore::new()), policy()));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let service = service.clone();
                let (login, id, address) = if i % 2 == 0 {
                    ("erin", erin.id, "10.0.0.1")
                } else {
                    ("frank", frank.id, "10.0.0.2")
                };
                tokio::spawn(async move {
                    service
                        .record_outcome(address, login, false, Some(id))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for (id, address) in [(erin.id, "10.0.0.1"), (frank.id, "10.0.0.2")] {
            assert_eq!(service.failure_count(&FailureKey::user(id)).await.unwrap(), 10);
            assert_eq!(
                service
                    .failure_count(&FailureKey::address(address))
                    .await
                    .unwrap(),
                10
            );
        }
        assert!(service.is_banned("10.0.0.1").await.unwrap());
        assert_eq!(
            service
                .tracker()
                .failure_counts(KeyKind::User)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_same_address_outcomes_apply_in_log_order() {
        let users = Arc::new(MockUserRepository::new());
        let log = Arc::new(SlowLoginLog::new("slow", Duration::from_millis(100)));
        let store = Arc::new(MemoryCounterStore::new());
        let config = PolicyConfig::new(3, 1).unwrap();

        let cached = LockoutService::new(
            users.clone(),
            log.clone(),
            Arc::new(CachedTracker::new(store.clone())),
            config.clone(),
        );
        let log_derived = LockoutService::new(
            users,
            log.clone(),
            Arc::new(LogDerivedTracker::new(log.clone())),
            config,
        );

        // The failure is appended first but acknowledged after the success arrives
        let failure = cached.record_outcome("1.2.3.4", "slow", false, None);
        let success = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cached.record_outcome("1.2.3.4", "fast", true, None).await
        };
        let (failure, success) = tokio::join!(failure, success);
        assert!(failure.unwrap().id < success.unwrap().id);

        let key = FailureKey::address("1.2.3.4");
        assert_eq!(log_derived.failure_count(&key).await.unwrap(), 0);
        assert_eq!(cached.failure_count(&key).await.unwrap(), 0);
        assert!(!cached.is_banned("1.2.3.4").await.unwrap());
        assert!(cached.key_locks.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_keys_do_not_deadlock() {
        let fixture = Fixture::new();
        let gina = fixture.users.insert("gina", "pw").await;
        let service = Arc::new(fixture.cached(Arc::new(MemoryCounterStore::new()), policy()));

        // Mixes attempts holding the user and address keys with ones holding only the address
        let tasks: Vec<_> = (0..30)
            .map(|i| {
                let service = service.clone();
                let user_id = (i % 3 != 0).then_some(gina.id);
                tokio::spawn(async move {
                    service
                        .record_outcome("10.9.9.9", "gina", false, user_id)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(
            service
                .failure_count(&FailureKey::address("10.9.9.9"))
                .await
                .unwrap(),
            30
        );
        assert_eq!(
            service.failure_count(&FailureKey::user(gina.id)).await.unwrap(),
            20
        );
    }

    #[tokio::test]
    async fn test_record_outcome_rejects_empty_address() {
        let fixture = Fixture::new();
        let service = fixture.log_derived(policy());
        let err = service
            .record_outcome("  ", "alice", false, None)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert_eq!(fixture.log.len(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates() {
        let fixture = Fixture::new();
        let service = fixture.cached(Arc::new(UnavailableCounterStore), policy());

        let err = service
            .evaluate_attempt("alice", "1.2.3.4")
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(service.is_banned("1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_closed() {
        let fixture = Fixture::new();
        let service = fixture.cached(
            Arc::new(UnavailableCounterStore),
            policy().with_fail_closed(true),
        );

        let evaluation = service.evaluate_attempt("alice", "1.2.3.4").await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::Banned);

        // The denial stands even though its failure could not be counted
        let outcome = service.attempt_login("alice", "pw", "1.2.3.4").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Banned);
    }

    #[tokio::test]
    async fn test_store_timeout() {
        let fixture = Fixture::new();
        let config = policy().with_store_timeout(Duration::from_millis(20));

        let service = fixture.cached(Arc::new(StalledCounterStore), config.clone());
        let err = service
            .evaluate_attempt("alice", "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::Timeout {
                operation: "ban_check",
                ..
            })
        ));

        let service = fixture.cached(Arc::new(StalledCounterStore), config.with_fail_closed(true));
        let evaluation = service.evaluate_attempt("alice", "1.2.3.4").await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::Banned);
    }

    #[tokio::test]
    async fn test_unusable_credential_is_an_error() {
        let fixture = Fixture::new();
        fixture
            .users
            .create(crate::NewUser {
                login: "broken".to_string(),
                password_hash: String::new(),
                salt: "salt".to_string(),
            })
            .await
            .unwrap();
        let service = fixture.log_derived(policy());

        let err = service
            .attempt_login("broken", "pw", "1.1.1.1")
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }
}
