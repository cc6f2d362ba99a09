//! report::memory
//!
//! In-memory error reporter for tests.

use std::sync::{Mutex, PoisonError};

use super::{ErrorReport, ErrorReporter};

/// Keeps reports in memory and numbers them `OOPS-TEST1`, `OOPS-TEST2`, ...
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports recorded so far.
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for MemoryReporter {
    fn record(&self, report: &ErrorReport) -> String {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        reports.push(report.clone());
        format!("OOPS-TEST{}", reports.len())
    }
}
