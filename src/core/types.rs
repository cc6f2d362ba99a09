//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`BranchId`] - Opaque database id of the branch being mirrored
//! - [`BranchKind`] - Mirrored, Imported or Hosted
//! - [`UniqueName`] - Human-readable unique branch name (`~user/project/branch`)
//! - [`RevisionId`] - Tip revision identifier, with a distinguished null revision
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use branch_puller::core::types::{BranchId, BranchKind, RevisionId, lock_id_for_branch};
//!
//! let id: BranchId = "42".parse().unwrap();
//! assert_eq!(lock_id_for_branch(id), "worker-for-branch-42@supermirror");
//!
//! let kind: BranchKind = "MIRRORED".parse().unwrap();
//! assert_eq!(kind, BranchKind::Mirrored);
//!
//! assert!(RevisionId::null().is_null());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch id: {0}")]
    InvalidBranchId(String),

    #[error("invalid branch kind: {0}")]
    InvalidBranchKind(String),

    #[error("invalid unique name: {0}")]
    InvalidUniqueName(String),

    #[error("invalid revision id: {0}")]
    InvalidRevisionId(String),
}

/// Database id of a branch.
///
/// The id is opaque to the worker; it is used for error reports and to
/// derive the lock id the worker writes into destination branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(u64);

impl BranchId {
    /// Wrap a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for BranchId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidBranchId(s.to_string()))
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock id a puller worker uses when it write-locks the destination of `branch_id`.
///
/// A stale lock carrying this id was left behind by an earlier worker for the
/// same branch and may be broken. Locks with any other id belong to someone else.
///
/// The trailing `@supermirror` keeps `worker-for-branch-1@` from matching as
/// a substring of `worker-for-branch-12@`.
pub fn lock_id_for_branch(branch_id: BranchId) -> String {
    format!("worker-for-branch-{}@supermirror", branch_id)
}

/// Kind of branch being mirrored.
///
/// Hosted branches never leave local storage and are not handled by the
/// puller; they are representable so that a misrouted job can be rejected
/// explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    /// Pulled periodically from an arbitrary external host.
    Mirrored,
    /// Produced by the code import pipeline under a fixed root.
    Imported,
    /// Pushed directly to local storage.
    Hosted,
}

impl BranchKind {
    /// Human-readable title, as shown in failure messages.
    ///
    /// # Example
    ///
    /// ```
    /// use branch_puller::core::types::BranchKind;
    ///
    /// assert_eq!(BranchKind::Imported.title(), "Imported");
    /// ```
    pub fn title(&self) -> &'static str {
        match self {
            BranchKind::Mirrored => "Mirrored",
            BranchKind::Imported => "Imported",
            BranchKind::Hosted => "Hosted",
        }
    }
}

impl FromStr for BranchKind {
    type Err = TypeError;

    /// Parse a branch kind. The scheduler sends enum names (`MIRRORED`),
    /// humans type lowercase; both are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mirrored" => Ok(BranchKind::Mirrored),
            "imported" => Ok(BranchKind::Imported),
            "hosted" => Ok(BranchKind::Hosted),
            _ => Err(TypeError::InvalidBranchKind(s.to_string())),
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Unique name of a branch, e.g. `~user/project/branch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueName(String);

impl UniqueName {
    /// Create a validated unique name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidUniqueName` if the name is empty or
    /// contains whitespace or control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidUniqueName(
                "unique name cannot be empty".into(),
            ));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypeError::InvalidUniqueName(format!(
                "unique name cannot contain whitespace: {:?}",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UniqueName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UniqueName> for String {
    fn from(name: UniqueName) -> Self {
        name.0
    }
}

impl fmt::Display for UniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a revision at the tip of a branch.
///
/// An empty branch has the null revision, spelled `null:` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    /// Wire spelling of the null revision.
    pub const NULL: &'static str = "null:";

    /// Create a revision id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRevisionId` for empty ids or ids with
    /// whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidRevisionId(id));
        }
        Ok(Self(id))
    }

    /// The revision of a branch with no history.
    pub fn null() -> Self {
        Self(Self::NULL.to_string())
    }

    /// Whether this is the null revision.
    pub fn is_null(&self) -> bool {
        self.0 == Self::NULL
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RevisionId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
