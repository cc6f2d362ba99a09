//! Branch Puller - mirrors remote and imported branches into local storage
//!
//! A puller worker is spawned by a scheduler once per branch. It opens the
//! branch's source, makes the local destination an exact copy of it, and
//! tells the scheduler what happened over a framed stream on stdout.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - The `puller-worker` binary (parses the job, wires the layers)
//! - [`mirror`] - Policies, safe opening, mirroring, and the worker itself
//! - [`vcs`] - The version-control engine seam, plus an in-memory engine
//! - [`git`] - The production engine, the only code that touches libgit2
//! - [`protocol`] - The worker protocol and its netstring framing
//! - [`report`] - Out-of-band error reports
//! - [`ui`] - Unattended answers to the engine's callbacks
//! - [`core`] - Domain types, URLs, configuration
//!
//! # Correctness Invariants
//!
//! 1. Every URL the engine dereferences has passed the open policy first
//! 2. Each job reports exactly one outcome, after `startMirroring`
//! 3. A lock is broken only if it carries this branch's own lock id
//! 4. Programming errors in the surrounding pipeline end the process instead
//!    of being reported as ordinary failures

pub mod cli;
pub mod core;
pub mod git;
pub mod mirror;
pub mod protocol;
pub mod report;
pub mod ui;
pub mod vcs;
