use std::{future::Future, time::Duration};

use crate::{
    Error,
    error::{StorageError, ValidationError},
};

/// Extension trait for Option types to simplify required field validation
///
/// # Example
///
/// ```rust,ignore
/// use tollgate_core::error::utilities::RequiredFieldExt;
///
/// let login = self.login.require_field("Login")?;
/// ```
pub trait RequiredFieldExt<T> {
    /// Convert None to a ValidationError::MissingField
    fn require_field(self, field_name: &str) -> Result<T, ValidationError>;
}

impl<T> RequiredFieldExt<T> for Option<T> {
    fn require_field(self, field_name: &str) -> Result<T, ValidationError> {
        self.ok_or_else(|| ValidationError::MissingField(format!("{field_name} is required")))
    }
}

/// Run a store operation with an upper bound on its latency.
///
/// An elapsed deadline becomes [`StorageError::Timeout`]; the operation's own
/// result is passed through untouched.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?after, "Store operation timed out");
            Err(Error::Storage(StorageError::Timeout { operation, after }))
        }
    }
}
