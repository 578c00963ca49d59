//! Repository traits for data access layer
//!
//! This module defines the interfaces services use to reach storage.
//!
//! # Trait Hierarchy
//!
//! - [`UserRepository`] and [`LoginLogRepository`] are served by a database backend and
//!   grouped behind [`RepositoryProvider`] together with lifecycle methods.
//! - [`CounterStore`] is the counter cache. It is deliberately not part of the provider:
//!   the cache usually lives in a different system (Redis, process memory) than the log.

pub mod adapter;
pub mod counter;
pub mod login_log;
pub mod user;

pub use adapter::{LoginLogRepositoryAdapter, UserRepositoryAdapter};
pub use counter::CounterStore;
pub use login_log::LoginLogRepository;
pub use user::UserRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for user repository access.
pub trait UserRepositoryProvider: Send + Sync + 'static {
    /// The user repository implementation type
    type UserRepo: UserRepository;

    /// Get the user repository
    fn user(&self) -> &Self::UserRepo;
}

/// Provider trait for login log repository access.
pub trait LoginLogRepositoryProvider: Send + Sync + 'static {
    /// The login log repository implementation type
    type LoginLogRepo: LoginLogRepository;

    /// Get the login log repository
    fn login_log(&self) -> &Self::LoginLogRepo;
}

/// Provider trait that database backends implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// 1. Implement [`UserRepository`] and [`LoginLogRepository`] for your backend
/// 2. Implement the two `*RepositoryProvider` traits
/// 3. Implement this trait with `migrate()` and `health_check()`
#[async_trait]
pub trait RepositoryProvider: UserRepositoryProvider + LoginLogRepositoryProvider {
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
