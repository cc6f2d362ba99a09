//! core::job
//!
//! The unit of work handed to a worker by the scheduler.

use serde::{Deserialize, Serialize};

use super::types::{BranchId, BranchKind, UniqueName};

/// One branch to mirror.
///
/// Constructed once per scheduling decision and consumed by exactly one
/// mirror attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorJob {
    /// Location to pull from.
    pub source: String,
    /// Location to pull into.
    pub destination: String,
    /// Database id of the branch.
    pub branch_id: BranchId,
    /// Unique name of the branch, used in messages and error reports.
    pub unique_name: UniqueName,
    /// Branch kind, which selects the open policy.
    pub kind: BranchKind,
    /// Default stacked-on location for the branch's project, if any.
    pub default_stacked_on: Option<String>,
}

impl MirrorJob {
    /// Build a job. An empty default stacked-on location means "none",
    /// since the scheduler cannot send an absent value.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        branch_id: BranchId,
        unique_name: UniqueName,
        kind: BranchKind,
        default_stacked_on: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            branch_id,
            unique_name,
            kind,
            default_stacked_on: default_stacked_on.filter(|s| !s.is_empty()),
        }
    }
}
