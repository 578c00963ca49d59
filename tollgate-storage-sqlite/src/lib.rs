//! SQLite storage backend for tollgate
//!
//! Provides the login event log and the credential store on top of `sqlx`. Connect with
//! [`SqliteStorage::connect`] and hand the resulting [`SqliteRepositoryProvider`] to the
//! `tollgate` builder, or construct the provider from an existing pool.
//!
//! ```rust,no_run
//! use tollgate_core::RepositoryProvider;
//! use tollgate_storage_sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), tollgate_core::Error> {
//! let storage = SqliteStorage::connect("sqlite://tollgate.db").await?;
//! let provider = storage.into_repository_provider();
//! provider.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tollgate_core::{Error, error::StorageError};

pub use repositories::{SqliteLoginLogRepository, SqliteRepositoryProvider, SqliteUserRepository};

/// Handle to a SQLite database.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url`.
    ///
    /// File databases use WAL journaling and wait on locks rather than failing. In-memory
    /// databases are held on a single connection that is never recycled, since shared-cache
    /// memory databases lock whole tables and vanish with their last connection.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };
        let options = if url.contains(":memory:") {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            Error::Storage(StorageError::Connection(e.to_string()))
        })?;

        tracing::debug!(url, "Connected to SQLite");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_repository_provider(self) -> SqliteRepositoryProvider {
        SqliteRepositoryProvider::new(self.pool)
    }
}
