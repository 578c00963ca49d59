//! Repository implementations for SQLite storage

pub mod login_log;
pub mod user;

pub use login_log::SqliteLoginLogRepository;
pub use user::SqliteUserRepository;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tollgate_core::{
    Error,
    error::StorageError,
    repositories::{LoginLogRepositoryProvider, RepositoryProvider, UserRepositoryProvider},
};

use crate::migrations::{self, SqliteMigrationManager};

/// Classify a driver error: pool exhaustion and I/O failures mean the database cannot be
/// reached, everything else is a failed statement.
pub(crate) fn storage_error(context: &str, e: sqlx::Error) -> Error {
    tracing::error!(error = %e, "{context}");
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::Storage(StorageError::Unavailable(format!("{context}: {e}")))
        }
        _ => Error::Storage(StorageError::Database(context.to_string())),
    }
}

/// Repository provider implementation for SQLite
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    user: Arc<SqliteUserRepository>,
    login_log: Arc<SqliteLoginLogRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let user = Arc::new(SqliteUserRepository::new(pool.clone()));
        let login_log = Arc::new(SqliteLoginLogRepository::new(pool.clone()));

        Self {
            pool,
            user,
            login_log,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl UserRepositoryProvider for SqliteRepositoryProvider {
    type UserRepo = SqliteUserRepository;

    fn user(&self) -> &Self::UserRepo {
        &self.user
    }
}

impl LoginLogRepositoryProvider for SqliteRepositoryProvider {
    type LoginLogRepo = SqliteLoginLogRepository;

    fn login_log(&self) -> &Self::LoginLogRepo {
        &self.login_log
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations::all()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Database health check failed", e))?;
        Ok(())
    }
}
