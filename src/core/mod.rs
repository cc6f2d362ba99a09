//! core
//!
//! Core domain types and configuration for the puller.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchId, BranchKind, UniqueName, RevisionId
//! - [`job`] - The unit of work handed to a worker
//! - [`locator`] - Branch location URLs
//! - [`blacklist`] - Hostnames that are never mirrored
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing

pub mod blacklist;
pub mod config;
pub mod job;
pub mod locator;
pub mod types;
