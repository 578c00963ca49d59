//! # Tollgate
//!
//! Tollgate guards a login form against brute-force attacks. It counts consecutive failed
//! attempts per user and per origin address, locks users and bans addresses once a
//! threshold is reached, and clears the count again on the next success.
//!
//! Every attempt is appended to a durable login log. Failure counts are either derived
//! from that log on demand, or kept in a counter cache (in-process or Redis) that is
//! rebuilt from the log with [`Tollgate::bootstrap`]. Both strategies give the same
//! lock and ban decisions.
//!
//! ## Storage Support
//!
//! - Login log and credential store: SQLite
//! - Counter cache: in-process memory, Redis
//!
//! ## Example
//!
//! ```rust,no_run
//! use tollgate::{LoginOutcome, TollgateBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite://tollgate.db")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     match tollgate.attempt_login("alice", "hunter2", "192.0.2.1").await? {
//!         LoginOutcome::Succeeded(user) => println!("Welcome back, {}", user.login),
//!         outcome => println!("{}", outcome.notice()),
//!     }
//!     Ok(())
//! }
//! ```
mod builder;

use std::sync::Arc;

use tollgate_core::{
    CachedTracker, FailureTracker, LogDerivedTracker, NewUser, RepositoryProvider,
    UserRepository,
    repositories::{LoginLogRepositoryAdapter, UserRepositoryAdapter, UserRepositoryProvider},
    services::{BootstrapService, LockoutService, ReportService},
};

pub use builder::{NoStorage, TollgateBuilder, TollgateBuilderError, WithStorage};

/// Re-export core types from tollgate_core
///
/// These types are commonly used when working with the Tollgate API.
pub use tollgate_core::{
    Backend, CounterStore, Evaluation, FailureKey, KeyKind, LastLogin, LoggedAttempt,
    LoginOutcome, MemoryCounterStore, PolicyConfig, User, UserId, Verdict,
    services::{BootstrapSummary, Report},
};

/// Re-export storage backends
pub use tollgate_storage_redis::RedisCounterStore;
pub use tollgate_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

type Users<R> = UserRepositoryAdapter<R>;
type LoginLog<R> = LoginLogRepositoryAdapter<R>;

/// Errors that can occur when using Tollgate.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    /// A store answered with an error
    #[error("Storage error: {0}")]
    Storage(String),
    /// A store could not be reached in time; never treat this as "allowed"
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// The login log could not be replayed into the counter cache
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),
    /// Invalid input or configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The credential store holds an unusable credential
    #[error("Auth error: {0}")]
    Auth(String),
}

impl TollgateError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TollgateError::Unavailable(_))
    }
}

impl From<tollgate_core::Error> for TollgateError {
    fn from(e: tollgate_core::Error) -> Self {
        use tollgate_core::Error;

        if e.is_store_unavailable() {
            return TollgateError::Unavailable(e.to_string());
        }
        match e {
            Error::Storage(_) => TollgateError::Storage(e.to_string()),
            Error::Bootstrap(_) => TollgateError::Bootstrap(e.to_string()),
            Error::Validation(_) => TollgateError::Configuration(e.to_string()),
            Error::Auth(_) => TollgateError::Auth(e.to_string()),
        }
    }
}

/// Which failure tracking strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterBackend {
    /// Derive every count from the login log
    #[default]
    Log,
    /// Keep counters in process memory
    Memory,
    /// Keep counters in Redis, shared between processes
    Redis,
}

impl std::str::FromStr for CounterBackend {
    type Err = tollgate_core::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log-derived" => Ok(CounterBackend::Log),
            "memory" => Ok(CounterBackend::Memory),
            "redis" => Ok(CounterBackend::Redis),
            other => Err(tollgate_core::error::ValidationError::UnknownBackend(
                other.to_string(),
            )),
        }
    }
}

impl std::fmt::Display for CounterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterBackend::Log => write!(f, "log"),
            CounterBackend::Memory => write!(f, "memory"),
            CounterBackend::Redis => write!(f, "redis"),
        }
    }
}

/// The login guard: policy engine, report aggregator and bootstrap over one set of stores.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tollgate::{PolicyConfig, SqliteRepositoryProvider, Tollgate};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
///     let repositories = Arc::new(SqliteRepositoryProvider::new(pool));
///
///     let tollgate = Tollgate::new(repositories).with_policy(PolicyConfig::new(5, 20)?);
///     tollgate.migrate().await?;
///
///     let report = tollgate.report().await?;
///     println!("{}", serde_json::to_string(&report)?);
///     Ok(())
/// }
/// ```
pub struct Tollgate<R: RepositoryProvider> {
    repositories: Arc<R>,
    counter_store: Option<Arc<dyn CounterStore>>,
    policy: PolicyConfig,
    lockout_service: LockoutService<Users<R>, LoginLog<R>>,
    report_service: ReportService<Users<R>>,
}

impl<R: RepositoryProvider> Tollgate<R> {
    /// Create a log-derived guard with the default policy.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::assemble(repositories, None, PolicyConfig::default())
    }

    /// Replace the lockout policy.
    pub fn with_policy(self, policy: PolicyConfig) -> Self {
        Self::assemble(self.repositories, self.counter_store, policy)
    }

    /// Track failures in `store` instead of deriving them from the log.
    ///
    /// The store must be bootstrapped with [`Tollgate::bootstrap`] before it serves
    /// decisions unless it is already populated.
    pub fn with_counter_store(self, store: Arc<dyn CounterStore>) -> Self {
        Self::assemble(self.repositories, Some(store), self.policy)
    }

    fn assemble(
        repositories: Arc<R>,
        counter_store: Option<Arc<dyn CounterStore>>,
        policy: PolicyConfig,
    ) -> Self {
        let users = Arc::new(UserRepositoryAdapter::new(repositories.clone()));
        let login_log = Arc::new(LoginLogRepositoryAdapter::new(repositories.clone()));

        let tracker: Arc<dyn FailureTracker> = match &counter_store {
            Some(store) => Arc::new(CachedTracker::new(store.clone())),
            None => Arc::new(LogDerivedTracker::new(login_log.clone())),
        };

        Self {
            lockout_service: LockoutService::new(
                users.clone(),
                login_log,
                tracker.clone(),
                policy.clone(),
            ),
            report_service: ReportService::new(users, tracker, policy.clone()),
            repositories,
            counter_store,
            policy,
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn backend(&self) -> Backend {
        self.lockout_service.tracker().backend()
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), TollgateError> {
        self.repositories
            .migrate()
            .await
            .map_err(|e| TollgateError::Storage(e.to_string()))
    }

    /// Health check for the database and, when configured, the counter cache
    pub async fn health_check(&self) -> Result<(), TollgateError> {
        self.repositories.health_check().await?;
        self.lockout_service.tracker().health_check().await?;
        Ok(())
    }

    /// Register a user in the credential store.
    pub async fn create_user(&self, login: &str, password: &str) -> Result<User, TollgateError> {
        let new_user = NewUser::builder()
            .login(login)
            .password(password)
            .build()
            .map_err(|e| TollgateError::Configuration(e.to_string()))?;

        let user = self.repositories.user().create(new_user).await?;
        tracing::info!(user_id = %user.id, login = %user.login, "Created user");
        Ok(user)
    }

    /// Check whether an attempt may proceed. The address ban is checked before the user lock.
    pub async fn evaluate_attempt(
        &self,
        login: &str,
        origin_address: &str,
    ) -> Result<Evaluation, TollgateError> {
        Ok(self
            .lockout_service
            .evaluate_attempt(login, origin_address)
            .await?)
    }

    /// Log an attempt and update the failure counts.
    pub async fn record_outcome(
        &self,
        origin_address: &str,
        login: &str,
        succeeded: bool,
        matched_user_id: Option<UserId>,
    ) -> Result<LoggedAttempt, TollgateError> {
        Ok(self
            .lockout_service
            .record_outcome(origin_address, login, succeeded, matched_user_id)
            .await?)
    }

    /// Evaluate, verify the password and record, in one call.
    pub async fn attempt_login(
        &self,
        login: &str,
        password: &str,
        origin_address: &str,
    ) -> Result<LoginOutcome, TollgateError> {
        Ok(self
            .lockout_service
            .attempt_login(login, password, origin_address)
            .await?)
    }

    pub async fn is_locked(&self, user_id: UserId) -> Result<bool, TollgateError> {
        Ok(self.lockout_service.is_locked(user_id).await?)
    }

    pub async fn is_banned(&self, origin_address: &str) -> Result<bool, TollgateError> {
        Ok(self.lockout_service.is_banned(origin_address).await?)
    }

    pub async fn failure_count(&self, key: &FailureKey) -> Result<u64, TollgateError> {
        Ok(self.lockout_service.failure_count(key).await?)
    }

    /// The session to greet a freshly logged-in user with.
    pub async fn last_login(&self, user_id: UserId) -> Result<Option<LastLogin>, TollgateError> {
        Ok(self.lockout_service.last_login(user_id).await?)
    }

    pub async fn find_user(&self, login: &str) -> Result<Option<User>, TollgateError> {
        Ok(self.lockout_service.find_user(login).await?)
    }

    pub async fn list_banned_addresses(
        &self,
    ) -> Result<std::collections::BTreeSet<String>, TollgateError> {
        Ok(self.report_service.list_banned_addresses().await?)
    }

    pub async fn list_locked_users(
        &self,
    ) -> Result<std::collections::BTreeSet<String>, TollgateError> {
        Ok(self.report_service.list_locked_users().await?)
    }

    /// Currently banned addresses and locked users.
    pub async fn report(&self) -> Result<Report, TollgateError> {
        Ok(self.report_service.snapshot().await?)
    }

    /// Rebuild the counter cache from the login log.
    ///
    /// Replaces the whole cache content; on any error the previous content is kept.
    ///
    /// # Errors
    ///
    /// [`TollgateError::Configuration`] when the guard is log-derived and has no cache.
    pub async fn bootstrap(&self) -> Result<BootstrapSummary, TollgateError> {
        let Some(store) = &self.counter_store else {
            return Err(TollgateError::Configuration(
                "the log-derived backend has no counter cache to bootstrap".to_string(),
            ));
        };

        let login_log = Arc::new(LoginLogRepositoryAdapter::new(self.repositories.clone()));
        let service = BootstrapService::new(login_log, store.clone());
        Ok(service.run().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::error::{BootstrapError, StorageError, ValidationError};

    #[test]
    fn test_counter_backend_from_str() {
        assert_eq!("log".parse::<CounterBackend>().unwrap(), CounterBackend::Log);
        assert_eq!(
            "log-derived".parse::<CounterBackend>().unwrap(),
            CounterBackend::Log
        );
        assert_eq!(
            " Redis ".parse::<CounterBackend>().unwrap(),
            CounterBackend::Redis
        );
        assert_eq!(
            "memory".parse::<CounterBackend>().unwrap(),
            CounterBackend::Memory
        );
        assert!(matches!(
            "memcached".parse::<CounterBackend>(),
            Err(ValidationError::UnknownBackend(name)) if name == "memcached"
        ));
        assert_eq!(CounterBackend::default().to_string(), "log");
    }

    #[test]
    fn test_error_conversion_keeps_unavailability() {
        let unavailable: TollgateError =
            tollgate_core::Error::Storage(StorageError::Unavailable("down".to_string())).into();
        assert!(unavailable.is_unavailable());

        let timeout: TollgateError = tollgate_core::Error::Storage(StorageError::Timeout {
            operation: "ban_check",
            after: std::time::Duration::from_millis(5),
        })
        .into();
        assert!(timeout.is_unavailable());

        let database: TollgateError =
            tollgate_core::Error::Storage(StorageError::Database("oops".to_string())).into();
        assert!(matches!(database, TollgateError::Storage(_)));

        let bootstrap: TollgateError = tollgate_core::Error::Bootstrap(
            BootstrapError::OutOfOrder { previous: 3, id: 2 },
        )
        .into();
        assert!(matches!(bootstrap, TollgateError::Bootstrap(_)));
    }
}
