//! Core functionality for the tollgate login guard
//!
//! This crate contains the failure-accounting and lockout-decision engine: the domain types
//! describing login attempts, the repository traits storage backends implement, the two
//! interchangeable failure tracking strategies, and the services built on top of them.
//!
//! Storage backends (`tollgate-storage-sqlite`, `tollgate-storage-redis`) depend on this crate
//! and implement the traits in [`repositories`]. Application code normally goes through the
//! `tollgate` facade crate instead of wiring these services by hand.
//!
//! See [`LockoutService`](services::LockoutService) for the policy engine,
//! [`ReportService`](services::ReportService) for enumeration and
//! [`BootstrapService`](services::BootstrapService) for rebuilding counter caches.
pub mod crypto;
pub mod error;
pub mod memory;
pub mod policy;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod tracker;
pub mod user;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;
pub use memory::MemoryCounterStore;
pub use policy::{Evaluation, LoginOutcome, PolicyConfig, Verdict};
pub use repositories::{CounterStore, LoginLogRepository, RepositoryProvider, UserRepository};
pub use storage::{
    Attempt, CounterSnapshot, FailureKey, KeyKind, LastLogin, LastLoginRecord, LoggedAttempt,
};
pub use tracker::{Backend, CachedTracker, FailureTracker, LogDerivedTracker};
pub use user::{NewUser, User, UserId};
