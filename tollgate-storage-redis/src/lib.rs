//! Redis counter cache for tollgate
//!
//! [`RedisCounterStore`] implements [`CounterStore`] for deployments where several
//! processes guard the same logins and need one shared set of counters. Counter updates are
//! single commands (`INCR`, `DEL`) and the last-login shift is a Lua script, so every
//! per-key mutation is atomic on the server.
//!
//! ```rust,no_run
//! use tollgate_storage_redis::RedisCounterStore;
//!
//! # async fn example() -> Result<(), tollgate_core::Error> {
//! let store = RedisCounterStore::connect("redis://127.0.0.1/", "tollgate").await?;
//! # Ok(())
//! # }
//! ```
pub mod keys;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use tollgate_core::{
    CounterStore, Error, FailureKey, KeyKind, UserId,
    error::StorageError,
    storage::{CounterSnapshot, LastLogin, LastLoginRecord},
};

pub use keys::KeyLayout;

const SCAN_BATCH: usize = 500;

const SHIFT_LAST_LOGIN: &str = r#"
local key = KEYS[1]
local current = redis.call('HMGET', key, 'current_ip', 'current_at')
if current[1] then
    redis.call('HSET', key, 'previous_ip', current[1], 'previous_at', current[2])
end
redis.call('HSET', key, 'current_ip', ARGV[1], 'current_at', ARGV[2])
return 1
"#;

/// Map a client error, telling an unreachable server apart from a failed command.
fn redis_error(context: &str, e: RedisError) -> Error {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        tracing::warn!(error = %e, "{context}");
        Error::Storage(StorageError::Unavailable(format!("{context}: {e}")))
    } else {
        tracing::error!(error = %e, "{context}");
        Error::Storage(StorageError::Database(format!("{context}: {e}")))
    }
}

/// Counter store backed by Redis.
///
/// Cloning is cheap: the underlying [`ConnectionManager`] multiplexes one connection and
/// reconnects on its own.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    layout: KeyLayout,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            layout: KeyLayout::new(prefix),
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, Error> {
        let client = Client::open(url).map_err(|e| {
            Error::Storage(StorageError::Connection(format!(
                "Failed to create Redis client: {e}"
            )))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to Redis");
            Error::Storage(StorageError::Connection(format!(
                "Failed to create Redis connection manager: {e}"
            )))
        })?;

        let store = Self::new(conn, prefix);
        tracing::debug!(prefix = store.layout.prefix(), "Connected to Redis");
        Ok(store)
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Every key matching `pattern`, walked with `SCAN` so the server is never blocked.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("Failed to scan keys", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

fn parse_last_login(
    fields: &HashMap<String, String>,
    ip_field: &str,
    at_field: &str,
) -> Option<LastLogin> {
    let address = fields.get(ip_field)?.clone();
    let millis = fields.get(at_field)?.parse::<i64>().ok()?;
    let at: DateTime<Utc> = DateTime::from_timestamp_millis(millis)?;
    Some(LastLogin { address, at })
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &FailureKey) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .incr(self.layout.failure_key(key), 1)
            .await
            .map_err(|e| redis_error("Failed to increment failure counter", e))?;
        Ok(count.max(0) as u64)
    }

    async fn reset(&self, key: &FailureKey) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.layout.failure_key(key))
            .await
            .map_err(|e| redis_error("Failed to reset failure counter", e))?;
        Ok(())
    }

    async fn get(&self, key: &FailureKey) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn
            .get(self.layout.failure_key(key))
            .await
            .map_err(|e| redis_error("Failed to read failure counter", e))?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn scan(&self, kind: KeyKind) -> Result<Vec<(FailureKey, u64)>, Error> {
        let raw_keys = self.scan_keys(&self.layout.failure_pattern(kind)).await?;
        if raw_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let counts: Vec<Option<i64>> = redis::cmd("MGET")
            .arg(&raw_keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("Failed to read failure counters", e))?;

        let mut result = Vec::with_capacity(raw_keys.len());
        for (raw, count) in raw_keys.iter().zip(counts) {
            // Deleted between SCAN and MGET
            let Some(count) = count else { continue };
            match self.layout.parse_failure_key(raw) {
                Some(key) => result.push((key, count.max(0) as u64)),
                None => tracing::warn!(key = %raw, "Ignoring unrecognized counter key"),
            }
        }
        Ok(result)
    }

    async fn shift_last_login(&self, user_id: UserId, login: LastLogin) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(SHIFT_LAST_LOGIN)
            .key(self.layout.last_login_key(user_id))
            .arg(&login.address)
            .arg(login.at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error("Failed to shift last login", e))?;
        Ok(())
    }

    async fn last_login(&self, user_id: UserId) -> Result<Option<LastLoginRecord>, Error> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.layout.last_login_key(user_id))
            .await
            .map_err(|e| redis_error("Failed to read last login", e))?;

        Ok(
            parse_last_login(&fields, "current_ip", "current_at").map(|current| LastLoginRecord {
                current,
                previous: parse_last_login(&fields, "previous_ip", "previous_at"),
            }),
        )
    }

    /// Swap the store's content for `snapshot` in one `MULTI`/`EXEC` transaction.
    ///
    /// Keys written by other clients between the initial key scan and the transaction
    /// survive; run this while no logins are being recorded.
    async fn replace_all(&self, snapshot: CounterSnapshot) -> Result<(), Error> {
        let mut stale = Vec::new();
        for pattern in self.layout.owned_patterns() {
            stale.extend(self.scan_keys(&pattern).await?);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &stale {
            pipe.del(key).ignore();
        }
        for (key, count) in &snapshot.failures {
            if *count > 0 {
                pipe.set(self.layout.failure_key(key), *count).ignore();
            }
        }
        for (user_id, record) in &snapshot.last_logins {
            let key = self.layout.last_login_key(*user_id);
            let mut fields = vec![
                ("current_ip", record.current.address.clone()),
                ("current_at", record.current.at.timestamp_millis().to_string()),
            ];
            if let Some(previous) = &record.previous {
                fields.push(("previous_ip", previous.address.clone()));
                fields.push(("previous_at", previous.at.timestamp_millis().to_string()));
            }
            pipe.hset_multiple(key, &fields).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("Failed to replace counter store content", e))?;

        tracing::info!(
            removed = stale.len(),
            failure_counters = snapshot.failures.len(),
            last_login_records = snapshot.last_logins.len(),
            "Replaced Redis counter store content"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("Redis health check failed", e))?;
        Ok(())
    }
}
