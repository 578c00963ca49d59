//! Builder pattern for constructing Tollgate instances
//!
//! This module provides a type-safe builder for creating [`Tollgate`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate::{PolicyConfig, TollgateBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Log-derived counters with auto-migration
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite://tollgate.db")
//!         .await?
//!         .with_policy(PolicyConfig::new(3, 10)?)
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Redis counter cache, rebuilt from the log at startup
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite://tollgate.db")
//!         .await?
//!         .with_redis_counters("redis://127.0.0.1/", "tollgate")
//!         .await?
//!         .bootstrap_on_build(true)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tollgate_core::{CounterStore, MemoryCounterStore, PolicyConfig, RepositoryProvider};
use tollgate_storage_redis::RedisCounterStore;
use tollgate_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

use crate::Tollgate;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Tollgate instance.
#[derive(Debug, thiserror::Error)]
pub enum TollgateBuilderError {
    /// Failed to connect to a storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Failed to rebuild the counter cache from the login log
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`TollgateBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
///
/// Contains the repository provider that will be used by Tollgate.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Tollgate`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build or add more configuration
pub struct TollgateBuilder<Storage> {
    storage: Storage,
    policy: PolicyConfig,
    counter_store: Option<Arc<dyn CounterStore>>,
    apply_migrations: bool,
    bootstrap_on_build: bool,
}

impl Default for TollgateBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl TollgateBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Policy: lock users after 3 failures, ban addresses after 10, 2 s store timeout,
    ///   fail open on the ban check
    /// - Counter backend: log-derived
    /// - Apply migrations: false
    /// - Bootstrap on build: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            policy: PolicyConfig::default(),
            counter_store: None,
            apply_migrations: false,
            bootstrap_on_build: false,
        }
    }

    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<TollgateBuilder<WithStorage<SqliteRepositoryProvider>>, TollgateBuilderError> {
        let storage = SqliteStorage::connect(url)
            .await
            .map_err(|e| TollgateBuilderError::StorageConnection(e.to_string()))?;

        let repositories = Arc::new(storage.into_repository_provider());
        Ok(self.with_repositories(repositories))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tollgate::TollgateBuilder;
    /// use sqlx::SqlitePool;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = SqlitePool::connect("sqlite::memory:").await?;
    ///
    /// let tollgate = TollgateBuilder::new()
    ///     .with_sqlite_pool(pool)
    ///     .apply_migrations(true)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> TollgateBuilder<WithStorage<SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(SqliteRepositoryProvider::new(pool)))
    }

    /// Use any repository provider, e.g. a custom database backend.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> TollgateBuilder<WithStorage<R>> {
        TollgateBuilder {
            storage: WithStorage { repositories },
            policy: self.policy,
            counter_store: self.counter_store,
            apply_migrations: self.apply_migrations,
            bootstrap_on_build: self.bootstrap_on_build,
        }
    }
}

// ============================================================================
// Configuration Methods (available after storage is configured)
// ============================================================================

impl<R: RepositoryProvider> TollgateBuilder<WithStorage<R>> {
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Keep failure counters in process memory.
    ///
    /// The cache starts empty; combine with [`bootstrap_on_build`](Self::bootstrap_on_build)
    /// unless the log is empty too.
    pub fn with_memory_counters(mut self) -> Self {
        self.counter_store = Some(Arc::new(MemoryCounterStore::new()));
        self
    }

    /// Keep failure counters in Redis under keys starting with `prefix`.
    pub async fn with_redis_counters(
        mut self,
        url: &str,
        prefix: &str,
    ) -> Result<Self, TollgateBuilderError> {
        let store = RedisCounterStore::connect(url, prefix)
            .await
            .map_err(|e| TollgateBuilderError::StorageConnection(e.to_string()))?;
        self.counter_store = Some(Arc::new(store));
        Ok(self)
    }

    /// Keep failure counters in a caller-supplied store.
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Rebuild the counter cache from the login log before returning the instance.
    ///
    /// Ignored for the log-derived backend.
    pub fn bootstrap_on_build(mut self, bootstrap: bool) -> Self {
        self.bootstrap_on_build = bootstrap;
        self
    }

    pub async fn build(self) -> Result<Tollgate<R>, TollgateBuilderError> {
        let policy = self
            .policy
            .validated()
            .map_err(|e| TollgateBuilderError::InvalidConfiguration(e.to_string()))?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| TollgateBuilderError::Migration(e.to_string()))?;
        }

        let bootstrap = self.bootstrap_on_build && self.counter_store.is_some();
        let mut tollgate = Tollgate::new(self.storage.repositories).with_policy(policy);
        if let Some(store) = self.counter_store {
            tollgate = tollgate.with_counter_store(store);
        }

        if bootstrap {
            tollgate
                .bootstrap()
                .await
                .map_err(|e| TollgateBuilderError::Bootstrap(e.to_string()))?;
        }

        tracing::debug!(backend = %tollgate.backend(), "Built tollgate");
        Ok(tollgate)
    }
}
