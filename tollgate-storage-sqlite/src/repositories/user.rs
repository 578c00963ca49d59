use async_trait::async_trait;
use sqlx::SqlitePool;
use tollgate_core::{Error, NewUser, User, UserId, error::StorageError, repositories::UserRepository};

use super::storage_error;

/// SQLite credential store.
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteUser {
    id: i64,
    login: String,
    password_hash: String,
    salt: String,
}

impl From<SqliteUser> for User {
    fn from(row: SqliteUser) -> Self {
        User {
            id: UserId::new(row.id),
            login: row.login,
            password_hash: row.password_hash,
            salt: row.salt,
        }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            INSERT INTO users (login, password_hash, salt)
            VALUES (?, ?, ?)
            RETURNING id, login, password_hash, salt
            "#,
        )
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Storage(StorageError::Database(format!(
                    "User with login {} already exists",
                    user.login
                )))
            }
            e => storage_error("Failed to create user", e),
        })?;

        tracing::debug!(user_id = row.id, login = %row.login, "Created user");
        Ok(row.into())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(
            "SELECT id, login, password_hash, salt FROM users WHERE id = ?",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to find user by id", e))?;

        Ok(row.map(User::from))
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(
            "SELECT id, login, password_hash, salt FROM users WHERE login = ?",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to find user by login", e))?;

        Ok(row.map(User::from))
    }
}
