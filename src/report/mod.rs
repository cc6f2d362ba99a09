//! report
//!
//! Out-of-band error reports for failed mirror attempts.
//!
//! # Architecture
//!
//! The protocol carries only a short message and an id. The full detail of
//! a failure goes to an [`ErrorReporter`], which stores it and returns the
//! id that correlates the two.
//!
//! - [`oops::OopsDirectory`]: one JSON document per failure on disk
//! - [`memory::MemoryReporter`]: keeps reports in memory, for tests
//!
//! Recording never fails from the caller's point of view. A reporter that
//! cannot store a report logs the problem and still returns an id, so a
//! broken report store never turns a reported failure into a crash.

pub mod memory;
pub mod oops;

use serde::Serialize;

use crate::core::types::BranchId;

pub use memory::MemoryReporter;
pub use oops::OopsDirectory;

/// Everything known about one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub branch_id: BranchId,
    pub source: String,
    pub destination: String,
    /// Public URL of the branch.
    pub url: String,
    /// Failure category.
    pub kind: String,
    /// Message sent to the scheduler.
    pub explanation: String,
    /// Full error detail, including its causes.
    pub detail: String,
}

/// A store for error reports.
pub trait ErrorReporter {
    /// Store `report` and return its id.
    fn record(&self, report: &ErrorReport) -> String;
}

/// Render an error and its chain of causes, one per line.
pub fn error_detail(err: &(dyn std::error::Error + 'static)) -> String {
    let mut detail = format!("{}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    detail
}
