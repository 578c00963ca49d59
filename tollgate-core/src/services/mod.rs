//! Service layer for business logic
//!
//! Services hold their repositories behind `Arc` and the failure tracker as
//! `Arc<dyn FailureTracker>`, so one set of storage handles can back all of them.

pub mod bootstrap;
pub mod lockout;
pub mod report;

pub use bootstrap::{BootstrapService, BootstrapSummary};
pub use lockout::LockoutService;
pub use report::{Report, ReportService};
