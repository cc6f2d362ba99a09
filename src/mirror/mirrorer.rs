//! mirror::mirrorer
//!
//! The open/create/update sequence that makes a destination branch an exact
//! mirror of a source branch.
//!
//! # Architecture
//!
//! [`BranchMirrorer`] owns no state beyond its collaborators: the engine,
//! the policy, and the UI callback bundle handed to every engine operation
//! that may prompt or report progress.
//!
//! A mirror runs strictly in order:
//!
//! 1. Open the destination, or (re)create it in the source's format
//! 2. Record the destination tip
//! 3. Break a stale lock left by a dead worker
//! 4. Stack the destination, if the policy wants it stacked
//! 5. Pull with overwrite
//!
//! # Recreating destinations
//!
//! The destination is wiped and created afresh when there is nothing usable
//! at the location, when its format differs from the source's, or when it
//! is stacked somewhere other than where the policy now wants it.
//!
//! Imported branches are produced by this system, so when the engine can
//! copy files directly the destination is populated by a raw copy. The copy
//! is repeated while the source changes underneath it, up to
//! [`CopyBounds`]; past that the engine-level create-and-pull is used.

use std::time::{Duration, Instant};

use super::errors::MirrorError;
use super::opener::SafeBranchOpener;
use super::policy::BranchOpenPolicy;
use crate::core::config::{Config, DEFAULT_COPY_MAX_ATTEMPTS, DEFAULT_COPY_TIMEOUT};
use crate::core::types::RevisionId;
use crate::vcs::{Branch, Engine, UiCallbacks, VcsError};

/// Limits on the raw copy of imported branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyBounds {
    /// Copies attempted before giving up. At least one is always made.
    pub max_attempts: u32,
    /// No new attempt starts once this much time has passed.
    pub timeout: Duration,
}

impl CopyBounds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.copy_max_attempts(),
            timeout: config.copy_timeout(),
        }
    }
}

impl Default for CopyBounds {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_COPY_MAX_ATTEMPTS,
            timeout: DEFAULT_COPY_TIMEOUT,
        }
    }
}

/// Result of a successful mirror.
#[derive(Debug)]
pub struct MirrorResult<B> {
    /// The destination branch after the pull.
    pub destination: B,
    /// Destination tip before the pull.
    pub revision_before: RevisionId,
    /// Stacked-on location applied to the destination, or empty.
    pub stacked_on_url: String,
}

/// Mirrors branches under a policy.
pub struct BranchMirrorer<'a, E: Engine> {
    engine: &'a E,
    policy: &'a BranchOpenPolicy,
    ui: &'a dyn UiCallbacks,
    copy_bounds: CopyBounds,
}

impl<'a, E: Engine> BranchMirrorer<'a, E> {
    pub fn new(engine: &'a E, policy: &'a BranchOpenPolicy, ui: &'a dyn UiCallbacks) -> Self {
        Self {
            engine,
            policy,
            ui,
            copy_bounds: CopyBounds::default(),
        }
    }

    /// Set the bounds on imported-branch raw copies.
    pub fn with_copy_bounds(mut self, copy_bounds: CopyBounds) -> Self {
        self.copy_bounds = copy_bounds;
        self
    }

    /// Open the branch at `url`, checking every location it leads to.
    pub fn open(&self, url: &str) -> Result<E::Branch, MirrorError> {
        SafeBranchOpener::new(self.engine, self.policy).open(url)
    }

    /// Open the branch at `destination`, or create it if what is there
    /// cannot be pulled into from `source`.
    pub fn open_destination_branch(
        &self,
        source: &E::Branch,
        destination: &str,
    ) -> Result<E::Branch, MirrorError> {
        let branch = match self.engine.open_branch(destination) {
            Ok(branch) => branch,
            Err(
                VcsError::NotBranch { .. }
                | VcsError::IncompatibleRepositories { .. }
                | VcsError::UnknownFormat { .. }
                | VcsError::UnsupportedFormat { .. },
            ) => {
                tracing::debug!(destination, "no usable destination branch");
                return self.create_destination_branch(source, destination);
            }
            Err(e) => return Err(e.into()),
        };

        if branch.format()? != source.format()? {
            self.ui.log("Formats differ.");
            tracing::info!(destination, "destination format differs from source");
            return self.create_destination_branch(source, destination);
        }

        if let Some(current) = branch.stacked_on_url()? {
            let desired = self.policy.stacked_on_url_for_destination(destination)?;
            if desired.as_deref() != Some(current.as_str()) {
                self.ui.log("Stacked-on location changed.");
                tracing::info!(destination, %current, ?desired, "destination stacked elsewhere");
                return self.create_destination_branch(source, destination);
            }
        }

        Ok(branch)
    }

    /// Wipe `destination` and create an empty branch there in the format of
    /// `source`.
    pub fn create_destination_branch(
        &self,
        source: &E::Branch,
        destination: &str,
    ) -> Result<E::Branch, MirrorError> {
        if self.policy.is_imported() && self.engine.supports_raw_copy(source.url(), destination) {
            if let Some(branch) = self.copy_import(source.url(), destination)? {
                return Ok(branch);
            }
            tracing::warn!(
                source = source.url(),
                attempts = self.copy_bounds.max_attempts,
                "import kept changing during copy, falling back to pull"
            );
        }
        self.engine.delete_tree(destination)?;
        let branch = self.engine.create_branch_like(destination, source)?;
        tracing::debug!(destination, "created destination branch");
        Ok(branch)
    }

    /// Copy the imported branch at `source` file by file. Returns `None` if
    /// no attempt saw a stable source within the bounds.
    fn copy_import(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<E::Branch>, MirrorError> {
        let started = Instant::now();
        for attempt in 1..=self.copy_bounds.max_attempts.max(1) {
            if attempt > 1 && started.elapsed() >= self.copy_bounds.timeout {
                break;
            }
            self.engine.delete_tree(destination)?;
            let before = self.engine.list_files(source)?.fingerprint();
            self.engine.copy_tree(source, destination)?;
            let after = self.engine.list_files(source)?.fingerprint();
            if before == after {
                tracing::debug!(source, attempt, "import copied");
                return Ok(Some(self.engine.open_branch(destination)?));
            }
            tracing::debug!(source, attempt, "import changed during copy");
        }
        Ok(None)
    }

    /// Stack `destination` as the policy wants, then pull `source` into it.
    ///
    /// Returns the stacked-on location applied, or an empty string.
    pub fn update_branch(
        &self,
        source: &E::Branch,
        destination: &E::Branch,
    ) -> Result<String, MirrorError> {
        let stacked_on_url = match self
            .policy
            .stacked_on_url_for_destination(destination.url())?
        {
            None => String::new(),
            Some(url) if destination.stacked_on_url()?.as_deref() == Some(url.as_str()) => url,
            Some(url) => match self.engine.set_stacked_on_url(destination, &url) {
                Ok(()) => url,
                Err(
                    e @ (VcsError::UnstackableFormat { .. }
                    | VcsError::IncompatibleRepositories { .. }
                    | VcsError::NotBranch { .. }),
                ) => {
                    tracing::warn!(
                        destination = destination.url(),
                        stacked_on = %url,
                        error = %e,
                        "cannot stack destination, mirroring unstacked"
                    );
                    String::new()
                }
                Err(e) => return Err(e.into()),
            },
        };
        self.engine.pull(destination, source, true, self.ui)?;
        Ok(stacked_on_url)
    }

    /// Make the branch at `destination` a mirror of `source`.
    pub fn mirror(
        &self,
        source: &E::Branch,
        destination: &str,
    ) -> Result<MirrorResult<E::Branch>, MirrorError> {
        let branch = self.open_destination_branch(source, destination)?;
        let revision_before = branch.tip()?;
        if let Some(holder) = branch.lock_holder()? {
            tracing::info!(destination, %holder, "destination is locked");
            self.engine.break_lock(&branch, self.ui)?;
        }
        let stacked_on_url = self.update_branch(source, &branch)?;
        tracing::debug!(destination, %revision_before, "mirrored");
        Ok(MirrorResult {
            destination: branch,
            revision_before,
            stacked_on_url,
        })
    }
}
