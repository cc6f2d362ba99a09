//! vcs
//!
//! Abstraction over the version-control engine.
//!
//! # Architecture
//!
//! The mirroring core never talks to a storage library directly. It sees
//! branches through the [`Engine`] and [`Branch`] traits defined here, which
//! expose only what mirroring needs: following references, opening and
//! creating branches, format introspection, stacking, locks and pulling.
//!
//! Implementations:
//! - [`crate::git::GitEngine`] - production engine backed by libgit2
//! - [`mock::MockEngine`] - in-memory engine for deterministic tests
//!
//! # Example
//!
//! ```
//! use branch_puller::vcs::{Engine, SilentUi};
//! use branch_puller::vcs::mock::{MockBranchState, MockEngine};
//!
//! fn mirror_once<E: Engine>(engine: &E, from: &str, to: &str) -> Result<(), branch_puller::vcs::VcsError> {
//!     let source = engine.open_branch(from)?;
//!     let dest = engine.create_branch_like(to, &source)?;
//!     engine.pull(&dest, &source, true, &SilentUi)
//! }
//!
//! let engine = MockEngine::new().with_branch("http://h/src", MockBranchState::new("r1"));
//! mirror_once(&engine, "http://h/src", "file:///dest").unwrap();
//! ```

pub mod format;
pub mod mock;
pub mod traits;

pub use format::{BranchFormat, FormatMarker, FormatStrings};
pub use traits::{
    Activity, Branch, Engine, SilentUi, TreeEntry, TreeListing, UiCallbacks, VcsError,
};
