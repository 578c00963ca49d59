pub mod utilities;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid login: {0}")]
    InvalidLogin(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown counter backend: {0}")]
    UnknownBackend(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Credential store problems. Wrong credentials are an outcome, not an error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Stored credential for user {user_id} is unusable: {reason}")]
    UnusableCredential { user_id: i64, reason: String },
}

/// Failures while replaying the login log into a counter cache.
///
/// Both variants are raised before the counter store is touched, so the
/// previous cache content is left as it was.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Malformed login log entry {id}: {reason}")]
    MalformedEntry { id: i64, reason: String },

    #[error("Login log entry {id} replayed after entry {previous}")]
    OutOfOrder { previous: i64, id: i64 },
}

impl Error {
    /// Whether this error means a counter or log store could not be reached in time.
    ///
    /// Callers must treat this as a hard failure and never as "allowed".
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::Connection(_))
                | Error::Storage(StorageError::Unavailable(_))
                | Error::Storage(StorageError::Timeout { .. })
        )
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_bootstrap_error(&self) -> bool {
        matches!(self, Error::Bootstrap(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
