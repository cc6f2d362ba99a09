//! vcs::traits
//!
//! The engine seam: the only version-control operations the mirroring core
//! consumes.
//!
//! # Design
//!
//! [`Engine`] is implemented by the git engine for production and by
//! [`super::mock::MockEngine`] for deterministic tests. Operations that only
//! read a branch live on [`Branch`]; operations that need the engine's
//! resources (locks, transports, UI callbacks) live on [`Engine`].
//!
//! Interactive behaviour of the engine is funnelled through
//! [`UiCallbacks`], which callers pass explicitly to every operation that may
//! prompt or report progress. Nothing is registered process-wide.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::format::BranchFormat;
use crate::core::types::RevisionId;

/// Errors from engine operations.
///
/// These map to the failure modes the worker distinguishes when it reports
/// an attempt back to the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VcsError {
    /// Nothing at the location looks like a branch.
    #[error("Not a branch: \"{url}\".")]
    NotBranch {
        /// The location that was opened
        url: String,
    },

    /// Two repositories cannot share history (e.g. different object formats).
    #[error("incompatible repositories: {message}")]
    IncompatibleRepositories { message: String },

    /// The branch format cannot be stacked.
    #[error("branch format does not support stacking: {message}")]
    UnstackableFormat { message: String },

    /// The branch is in a format too old or too partial to mirror.
    #[error("unsupported branch format at {url}")]
    UnsupportedFormat { url: String },

    /// The branch format is not recognised at all.
    #[error("{message}")]
    UnknownFormat { message: String },

    /// The server wants credentials.
    #[error("authentication required for {url}")]
    AuthenticationRequired { url: String },

    /// The server answered with an unexpected HTTP status.
    #[error("Unexpected HTTP status {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Server or transport diagnosis
        message: String,
    },

    /// Network or socket failure.
    #[error("{message}")]
    Transport { message: String },

    /// The transport can only authenticate interactively (ssh).
    #[error("interactive authentication required for {url}")]
    InteractiveAuthRequired { url: String },

    /// No transport is available for the location.
    #[error("unsupported protocol for url \"{url}\"")]
    UnsupportedTransport { url: String },

    /// The branch is write-locked by someone who may not be overridden.
    #[error("branch is locked by {holder}")]
    LockContention { holder: String },

    /// Local filesystem failure.
    #[error("i/o error: {message}")]
    Io { message: String },

    /// Any other engine failure.
    #[error("{message}")]
    Internal { message: String },
}

impl From<std::io::Error> for VcsError {
    fn from(err: std::io::Error) -> Self {
        VcsError::Io {
            message: err.to_string(),
        }
    }
}

/// Kind of liveness signal raised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    /// A progress bar advanced.
    ProgressBar,
    /// Bytes moved over the network.
    Network,
}

impl Activity {
    /// Name used in logs and in-process events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::ProgressBar => "progress_bar",
            Activity::Network => "network",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers the engine's interactive prompts and receives its progress.
pub trait UiCallbacks {
    /// Whether a stale lock described by `prompt` may be broken.
    fn confirm_lock_break(&self, prompt: &str) -> bool;

    /// The engine made progress.
    fn progress(&self, activity: Activity);

    /// A human-readable note about what the mirrorer is doing.
    fn log(&self, _message: &str) {}
}

/// Callbacks that refuse every prompt and discard every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentUi;

impl UiCallbacks for SilentUi {
    fn confirm_lock_break(&self, _prompt: &str) -> bool {
        false
    }

    fn progress(&self, _activity: Activity) {}
}

/// One file in a recursive listing of a branch's storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeEntry {
    /// Path relative to the branch root, `/`-separated
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the epoch, if known
    pub modified: Option<u128>,
}

/// Recursive listing of a branch's storage, used to detect concurrent writers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    entries: Vec<TreeEntry>,
}

impl TreeListing {
    /// Build a listing; entry order does not matter.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort();
        Self { entries }
    }

    /// Listed entries, sorted by path.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Digest of the listing. Equal fingerprints mean nothing was written.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.path.as_bytes());
            hasher.update([0]);
            hasher.update(entry.size.to_le_bytes());
            hasher.update(entry.modified.unwrap_or(0).to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// An opened branch.
pub trait Branch: fmt::Debug {
    /// Location the branch was opened from.
    fn url(&self) -> &str;

    /// Tip revision, or the null revision for an empty branch.
    fn tip(&self) -> Result<RevisionId, VcsError>;

    /// Storage format.
    fn format(&self) -> Result<BranchFormat, VcsError>;

    /// Location this branch is stacked on, as last configured.
    fn stacked_on_url(&self) -> Result<Option<String>, VcsError>;

    /// Holder of the branch's write lock, if a lock is present.
    fn lock_holder(&self) -> Result<Option<String>, VcsError>;
}

/// A version-control engine.
pub trait Engine {
    /// Branch handle type.
    type Branch: Branch;

    /// If `url` is a branch reference, the location it points at.
    fn follow_reference(&self, url: &str) -> Result<Option<String>, VcsError>;

    /// Stacked-on location declared by the branch at `url`, read without
    /// opening the branch.
    fn declared_stacked_on(&self, url: &str) -> Result<Option<String>, VcsError>;

    /// Open the branch at `url`.
    fn open_branch(&self, url: &str) -> Result<Self::Branch, VcsError>;

    /// Create an empty branch at `url` in the same format as `like`.
    fn create_branch_like(&self, url: &str, like: &Self::Branch) -> Result<Self::Branch, VcsError>;

    /// Remove everything stored at `url`. Missing locations are not an error.
    fn delete_tree(&self, url: &str) -> Result<(), VcsError>;

    /// Whether [`Engine::copy_tree`] can copy from `source` to `destination`.
    fn supports_raw_copy(&self, source: &str, destination: &str) -> bool;

    /// Recursive listing of the storage at `url`.
    fn list_files(&self, url: &str) -> Result<TreeListing, VcsError>;

    /// Copy the storage at `source` to `destination` file by file.
    fn copy_tree(&self, source: &str, destination: &str) -> Result<(), VcsError>;

    /// Stack `branch` on `url`, resolved relative to the branch.
    fn set_stacked_on_url(&self, branch: &Self::Branch, url: &str) -> Result<(), VcsError>;

    /// Break a stale write lock on `branch`, if `ui` agrees.
    fn break_lock(&self, branch: &Self::Branch, ui: &dyn UiCallbacks) -> Result<(), VcsError>;

    /// Make `destination` an exact copy of `source`'s history.
    ///
    /// With `overwrite`, history on `destination` that `source` lacks is
    /// discarded rather than reported as divergence.
    fn pull(
        &self,
        destination: &Self::Branch,
        source: &Self::Branch,
        overwrite: bool,
        ui: &dyn UiCallbacks,
    ) -> Result<(), VcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            size,
            modified: Some(1),
        }
    }

    #[test]
    fn fingerprint_ignores_listing_order() {
        let a = TreeListing::new(vec![entry("HEAD", 21), entry("config", 90)]);
        let b = TreeListing::new(vec![entry("config", 90), entry("HEAD", 21)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_sees_size_changes() {
        let a = TreeListing::new(vec![entry("objects/pack/p.pack", 100)]);
        let b = TreeListing::new(vec![entry("objects/pack/p.pack", 101)]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_sees_new_files() {
        let a = TreeListing::new(vec![entry("HEAD", 21)]);
        let b = TreeListing::new(vec![entry("HEAD", 21), entry("index", 0)]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn silent_ui_refuses_lock_breaks() {
        assert!(!SilentUi.confirm_lock_break("Break lock held by anyone?"));
    }

    #[test]
    fn not_branch_message_quotes_url() {
        let err = VcsError::NotBranch {
            url: "http://example.com/b".into(),
        };
        assert_eq!(err.to_string(), "Not a branch: \"http://example.com/b\".");
    }
}
