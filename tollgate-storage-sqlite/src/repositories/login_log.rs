//! SQLite implementation of the login event log.
//!
//! Failure counts are computed in a single statement per question: the id of the key's
//! last success is looked up in a subquery of the same `SELECT` that counts the failures
//! after it, so no append can land between the two reads.

use async_trait::async_trait;
use chrono::DateTime;
use futures::{StreamExt, stream::BoxStream};
use sqlx::SqlitePool;
use tollgate_core::{
    Error, UserId,
    error::BootstrapError,
    repositories::LoginLogRepository,
    storage::{Attempt, FailureKey, KeyKind, LastLogin, LastLoginRecord, LoggedAttempt},
};

use super::storage_error;

pub struct SqliteLoginLogRepository {
    pool: SqlitePool,
}

impl SqliteLoginLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteLoginLogEntry {
    id: i64,
    created_at: i64,
    user_id: Option<i64>,
    login: String,
    ip: String,
    succeeded: i64,
}

impl TryFrom<SqliteLoginLogEntry> for LoggedAttempt {
    type Error = BootstrapError;

    fn try_from(row: SqliteLoginLogEntry) -> Result<Self, Self::Error> {
        let created_at =
            DateTime::from_timestamp(row.created_at, 0).ok_or(BootstrapError::MalformedEntry {
                id: row.id,
                reason: format!("timestamp {} is out of range", row.created_at),
            })?;
        let succeeded = match row.succeeded {
            0 => false,
            1 => true,
            other => {
                return Err(BootstrapError::MalformedEntry {
                    id: row.id,
                    reason: format!("succeeded flag {other} is not 0 or 1"),
                });
            }
        };

        Ok(LoggedAttempt {
            id: row.id,
            attempt: Attempt {
                origin_address: row.ip,
                login: row.login,
                user_id: row.user_id.map(UserId::new),
                succeeded,
                created_at,
            },
        })
    }
}

const USER_FAILURES_SINCE_SUCCESS: &str = r#"
    SELECT COUNT(*) FROM login_log
    WHERE user_id = ? AND succeeded = 0
      AND id > COALESCE(
        (SELECT MAX(id) FROM login_log WHERE user_id = ? AND succeeded = 1), 0)
"#;

const IP_FAILURES_SINCE_SUCCESS: &str = r#"
    SELECT COUNT(*) FROM login_log
    WHERE ip = ? AND succeeded = 0
      AND id > COALESCE(
        (SELECT MAX(id) FROM login_log WHERE ip = ? AND succeeded = 1), 0)
"#;

const USER_FAILURE_COUNTS: &str = r#"
    SELECT f.user_id, COUNT(*) FROM login_log f
    WHERE f.user_id IS NOT NULL AND f.succeeded = 0
      AND f.id > COALESCE(
        (SELECT MAX(s.id) FROM login_log s WHERE s.user_id = f.user_id AND s.succeeded = 1), 0)
    GROUP BY f.user_id
"#;

const IP_FAILURE_COUNTS: &str = r#"
    SELECT f.ip, COUNT(*) FROM login_log f
    WHERE f.succeeded = 0
      AND f.id > COALESCE(
        (SELECT MAX(s.id) FROM login_log s WHERE s.ip = f.ip AND s.succeeded = 1), 0)
    GROUP BY f.ip
"#;

#[async_trait]
impl LoginLogRepository for SqliteLoginLogRepository {
    async fn append(&self, attempt: &Attempt) -> Result<LoggedAttempt, Error> {
        let row = sqlx::query_as::<_, SqliteLoginLogEntry>(
            r#"
            INSERT INTO login_log (created_at, user_id, login, ip, succeeded)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, created_at, user_id, login, ip, succeeded
            "#,
        )
        .bind(attempt.created_at.timestamp())
        .bind(attempt.user_id.map(|id| id.as_i64()))
        .bind(&attempt.login)
        .bind(&attempt.origin_address)
        .bind(attempt.succeeded as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to append login attempt", e))?;

        Ok(LoggedAttempt::try_from(row)?)
    }

    async fn failures_since_last_success(&self, key: &FailureKey) -> Result<u64, Error> {
        let count: i64 = match key {
            FailureKey::User(id) => sqlx::query_scalar::<_, i64>(USER_FAILURES_SINCE_SUCCESS)
                .bind(id.as_i64())
                .bind(id.as_i64())
                .fetch_one(&self.pool)
                .await,
            FailureKey::Address(address) => sqlx::query_scalar::<_, i64>(IP_FAILURES_SINCE_SUCCESS)
                .bind(address.as_str())
                .bind(address.as_str())
                .fetch_one(&self.pool)
                .await,
        }
        .map_err(|e| storage_error("Failed to count failures since last success", e))?;

        Ok(count as u64)
    }

    async fn failure_counts(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let counts = match kind {
            KeyKind::User => sqlx::query_as::<_, (i64, i64)>(USER_FAILURE_COUNTS)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| storage_error("Failed to count user failures", e))?
                .into_iter()
                .map(|(id, count)| (FailureKey::user(UserId::new(id)), count as u64))
                .collect(),
            KeyKind::Address => sqlx::query_as::<_, (String, i64)>(IP_FAILURE_COUNTS)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| storage_error("Failed to count address failures", e))?
                .into_iter()
                .map(|(ip, count)| (FailureKey::address(ip), count as u64))
                .collect(),
        };

        Ok(counts)
    }

    async fn last_logins(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        let rows = sqlx::query_as::<_, (i64, String, i64)>(
            r#"
            SELECT id, ip, created_at FROM login_log
            WHERE user_id = ? AND succeeded = 1
            ORDER BY id DESC
            LIMIT 2
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load last logins", e))?;

        let mut logins = Vec::with_capacity(rows.len());
        for (id, address, created_at) in rows {
            let at = DateTime::from_timestamp(created_at, 0).ok_or_else(|| {
                tracing::warn!(id, created_at, "Login log row has an unreadable timestamp");
                BootstrapError::MalformedEntry {
                    id,
                    reason: format!("timestamp {created_at} is out of range"),
                }
            })?;
            logins.push(LastLogin { address, at });
        }

        let mut logins = logins.into_iter();
        Ok(logins.next().map(|current| LastLoginRecord {
            current,
            previous: logins.next(),
        }))
    }

    fn replay(&self) -> BoxStream<'_, Result<LoggedAttempt, Error>> {
        sqlx::query_as::<_, SqliteLoginLogEntry>(
            "SELECT id, created_at, user_id, login, ip, succeeded FROM login_log ORDER BY id",
        )
        .fetch(&self.pool)
        .map(|row| -> Result<LoggedAttempt, Error> {
            let row = row.map_err(|e| storage_error("Failed to read login log", e))?;
            Ok(LoggedAttempt::try_from(row)?)
        })
        .boxed()
    }
}
