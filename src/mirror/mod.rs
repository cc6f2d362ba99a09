//! mirror
//!
//! Safe branch mirroring.
//!
//! # Modules
//!
//! - [`policy`] - Which URLs may be opened, and where destinations stack
//! - [`opener`] - Opening branches with every hop checked by the policy
//! - [`mirrorer`] - The open/create/update sequence for a destination
//! - [`worker`] - One reported mirror attempt per job
//! - [`errors`] - Error types and the failure taxonomy
//!
//! # Architecture
//!
//! ```text
//! PullerWorker ──> BranchMirrorer ──> SafeBranchOpener ──> BranchOpenPolicy
//!      │                 │                   │
//!      │                 └───────────────────┴──────────> vcs::Engine
//!      └──> WorkerProtocol, ErrorReporter
//! ```
//!
//! Nothing in this module touches storage or the network directly; all of
//! it goes through [`crate::vcs::Engine`].

pub mod errors;
pub mod mirrorer;
pub mod opener;
pub mod policy;
pub mod worker;

pub use errors::{classify, BadUrl, Classified, FailureKind, MirrorError};
pub use mirrorer::{BranchMirrorer, CopyBounds, MirrorResult};
pub use opener::SafeBranchOpener;
pub use policy::{AcceptAnythingPolicy, BranchOpenPolicy, ImportedPolicy, MirroredPolicy};
pub use worker::{MirrorOutcome, PullerWorker, WorkerError};
