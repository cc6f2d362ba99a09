//! git
//!
//! The production version-control engine, backed by libgit2.
//!
//! # Architecture
//!
//! This module is the **only doorway** to libgit2. No other module imports
//! `git2`; the mirroring core reaches git exclusively through the
//! [`crate::vcs::Engine`] implementation here. We use the `git2` crate
//! exclusively (no shelling out to the git CLI).
//!
//! # Responsibilities
//!
//! - Opening local and remote repositories as branches
//! - Format introspection from `core.repositoryformatversion` and extensions
//! - Branch references (`gitdir:` files) and stacking (alternates)
//! - Destination locking
//! - Fetching with overwrite semantics
//!
//! # Invariants
//!
//! - A pull into a destination always holds the destination's lock
//! - A live lock is never broken; a stale one only with UI consent
//! - Redirects are never followed

mod interface;
pub mod lock;

pub use interface::{GitBranch, GitEngine};
