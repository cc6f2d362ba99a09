//! mirror::opener
//!
//! Opening branches without ever dereferencing a URL the policy has not
//! seen.
//!
//! # Architecture
//!
//! Opening a branch can touch more locations than the one asked for:
//!
//! 1. The URL may hold a branch reference, which points somewhere else.
//! 2. The branch found may declare a stacked-on location, which may itself
//!    be stacked, and so on.
//!
//! [`SafeBranchOpener`] walks both chains itself, running every hop through
//! the [`BranchOpenPolicy`] before the engine is allowed to open anything.
//! Each chain carries its own set of visited locations so a cycle ends in
//! [`MirrorError::BranchLoop`] instead of recursing forever.

use std::collections::HashSet;

use super::errors::MirrorError;
use super::policy::BranchOpenPolicy;
use crate::core::locator;
use crate::vcs::Engine;

/// Opens branches under a policy.
#[derive(Debug)]
pub struct SafeBranchOpener<'a, E: Engine> {
    engine: &'a E,
    policy: &'a BranchOpenPolicy,
}

impl<'a, E: Engine> SafeBranchOpener<'a, E> {
    pub fn new(engine: &'a E, policy: &'a BranchOpenPolicy) -> Self {
        Self { engine, policy }
    }

    /// Follow branch references from `url` to the location holding the
    /// branch itself, checking every hop.
    ///
    /// # Errors
    ///
    /// - Policy rejections of any hop
    /// - [`MirrorError::BranchReferenceForbidden`] if a reference is found
    ///   and the policy does not follow references
    /// - [`MirrorError::BranchLoop`] if a hop revisits a location
    pub fn follow_reference(&self, url: &str) -> Result<String, MirrorError> {
        let mut seen = HashSet::new();
        let mut current = url.to_string();
        loop {
            if !seen.insert(current.clone()) {
                return Err(MirrorError::BranchLoop { url: current });
            }
            self.policy.check_url(&current)?;
            let Some(target) = self.engine.follow_reference(&current)? else {
                return Ok(current);
            };
            if !self.policy.should_follow_references() {
                return Err(MirrorError::BranchReferenceForbidden { url: current });
            }
            tracing::debug!(from = %current, to = %target, "following branch reference");
            current = locator::join(&current, &target)?;
        }
    }

    /// Walk the stacked-on chain of the branch at `url`, checking every
    /// declared location that the policy wants rechecked.
    ///
    /// # Errors
    ///
    /// - Policy rejections of any stacked-on location
    /// - [`MirrorError::Invariant`] if the policy forbids stacking outright
    /// - [`MirrorError::BranchLoop`] if the chain revisits a location
    pub fn check_stacking_chain(&self, url: &str) -> Result<(), MirrorError> {
        let mut seen = HashSet::from([url.trim_end_matches('/').to_string()]);
        let mut current = url.to_string();
        while let Some(declared) = self.engine.declared_stacked_on(&current)? {
            let (mut next, recheck) = self
                .policy
                .transform_fallback_location(&current, &declared)?;
            if recheck {
                next = self.follow_reference(&next)?;
            }
            if !seen.insert(next.trim_end_matches('/').to_string()) {
                return Err(MirrorError::BranchLoop { url: next });
            }
            tracing::debug!(branch = %current, stacked_on = %next, "checked stacked-on location");
            current = next;
        }
        Ok(())
    }

    /// Open the branch at `url`.
    ///
    /// # Errors
    ///
    /// Anything [`follow_reference`](Self::follow_reference) or
    /// [`check_stacking_chain`](Self::check_stacking_chain) reports, and
    /// engine failures to open the branch.
    pub fn open(&self, url: &str) -> Result<E::Branch, MirrorError> {
        let target = self.follow_reference(url)?;
        self.check_stacking_chain(&target)?;
        Ok(self.engine.open_branch(&target)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mirror::errors::BadUrl;
    use crate::mirror::policy::{AcceptAnythingPolicy, ImportedPolicy, MirroredPolicy};
    use crate::vcs::mock::{MockBranchState, MockEngine, MockOperation};
    use crate::vcs::Branch;

    fn mirrored() -> BranchOpenPolicy {
        BranchOpenPolicy::Mirrored(MirroredPolicy::new(
            "launchpad.net",
            Arc::new(vec!["localhost".to_string()]),
            None,
        ))
    }

    fn accept_anything() -> BranchOpenPolicy {
        BranchOpenPolicy::AcceptAnything(AcceptAnythingPolicy::default())
    }

    mod references {
        use super::*;

        #[test]
        fn plain_branch_opens() {
            let engine =
                MockEngine::new().with_branch("http://example.com/a", MockBranchState::new("r1"));
            let policy = mirrored();
            let branch = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap();
            assert_eq!(branch.url(), "http://example.com/a");
        }

        #[test]
        fn reference_followed() {
            let engine = MockEngine::new()
                .with_reference("http://example.com/a", "http://example.com/b")
                .with_branch("http://example.com/b", MockBranchState::new("r1"));
            let policy = mirrored();
            let branch = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap();
            assert_eq!(branch.url(), "http://example.com/b");
        }

        #[test]
        fn reference_target_is_checked() {
            let engine = MockEngine::new()
                .with_reference("http://example.com/a", "http://localhost/b")
                .with_branch("http://localhost/b", MockBranchState::new("r1"));
            let policy = mirrored();
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap_err();
            assert!(matches!(
                err,
                MirrorError::BadUrl(BadUrl::Blacklisted { .. })
            ));
            assert!(!engine
                .operations()
                .contains(&MockOperation::Open {
                    url: "http://localhost/b".into()
                }));
        }

        #[test]
        fn relative_reference_resolved() {
            let engine = MockEngine::new()
                .with_reference("http://example.com/a", "../b")
                .with_branch("http://example.com/b", MockBranchState::new("r1"));
            let policy = mirrored();
            let branch = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap();
            assert_eq!(branch.url(), "http://example.com/b");
        }

        #[test]
        fn reference_loop_detected() {
            let engine = MockEngine::new()
                .with_reference("http://example.com/a", "http://example.com/b")
                .with_reference("http://example.com/b", "http://example.com/a");
            let policy = mirrored();
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap_err();
            assert!(matches!(err, MirrorError::BranchLoop { url } if url == "http://example.com/a"));
        }

        #[test]
        fn self_reference_is_a_loop() {
            let engine =
                MockEngine::new().with_reference("http://example.com/a", "http://example.com/a");
            let policy = mirrored();
            assert!(matches!(
                SafeBranchOpener::new(&engine, &policy).open("http://example.com/a"),
                Err(MirrorError::BranchLoop { .. })
            ));
        }

        #[test]
        fn imported_refuses_references() {
            let engine = MockEngine::new()
                .with_reference("http://imports/1", "http://imports/2")
                .with_branch("http://imports/2", MockBranchState::new("r1"));
            let policy = BranchOpenPolicy::Imported(ImportedPolicy::new("http://imports/"));
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://imports/1")
                .unwrap_err();
            assert!(
                matches!(err, MirrorError::BranchReferenceForbidden { url } if url == "http://imports/1")
            );
        }

        #[test]
        fn missing_branch_is_engine_error() {
            let engine = MockEngine::new();
            let policy = mirrored();
            assert!(matches!(
                SafeBranchOpener::new(&engine, &policy).open("http://example.com/none"),
                Err(MirrorError::Vcs(crate::vcs::VcsError::NotBranch { .. }))
            ));
        }
    }

    mod stacking {
        use super::*;

        #[test]
        fn stacked_on_location_is_checked() {
            let engine = MockEngine::new()
                .with_branch(
                    "http://example.com/a",
                    MockBranchState::new("r1").stacked_on("http://launchpad.net/base"),
                )
                .with_branch("http://launchpad.net/base", MockBranchState::new("r0"));
            let policy = mirrored();
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap_err();
            assert!(matches!(err, MirrorError::BadUrl(BadUrl::SelfHosted { .. })));
        }

        #[test]
        fn relative_stacked_on_resolved_against_branch() {
            let engine = MockEngine::new()
                .with_branch(
                    "http://example.com/p/feature",
                    MockBranchState::new("r1").stacked_on("/p/trunk"),
                )
                .with_branch("http://example.com/p/trunk", MockBranchState::new("r0"));
            let policy = mirrored();
            SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/p/feature")
                .unwrap();
            assert!(engine.operations().contains(&MockOperation::FollowReference {
                url: "http://example.com/p/trunk".into()
            }));
        }

        #[test]
        fn chain_checked_transitively() {
            let engine = MockEngine::new()
                .with_branch(
                    "http://example.com/a",
                    MockBranchState::new("r2").stacked_on("http://example.com/b"),
                )
                .with_branch(
                    "http://example.com/b",
                    MockBranchState::new("r1").stacked_on("sftp://example.com/c"),
                );
            let policy = mirrored();
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://example.com/a")
                .unwrap_err();
            assert!(matches!(err, MirrorError::BadUrl(BadUrl::Ssh { .. })));
        }

        #[test]
        fn stacking_loop_detected() {
            let engine = MockEngine::new()
                .with_branch(
                    "http://example.com/a",
                    MockBranchState::new("r1").stacked_on("http://example.com/b"),
                )
                .with_branch(
                    "http://example.com/b",
                    MockBranchState::new("r1").stacked_on("http://example.com/a"),
                );
            let policy = mirrored();
            assert!(matches!(
                SafeBranchOpener::new(&engine, &policy).open("http://example.com/a"),
                Err(MirrorError::BranchLoop { .. })
            ));
        }

        #[test]
        fn accept_anything_does_not_recheck() {
            let engine = MockEngine::new()
                .with_branch(
                    "file:///srv/a",
                    MockBranchState::new("r1").stacked_on("/srv/base"),
                )
                .with_branch("file:///srv/base", MockBranchState::new("r0"));
            let policy = accept_anything();
            SafeBranchOpener::new(&engine, &policy)
                .open("file:///srv/a")
                .unwrap();
            assert!(!engine.operations().contains(&MockOperation::FollowReference {
                url: "file:///srv/base".into()
            }));
        }

        #[test]
        fn stacked_import_is_fatal() {
            let engine = MockEngine::new()
                .with_branch(
                    "http://imports/1",
                    MockBranchState::new("r1").stacked_on("http://imports/2"),
                );
            let policy = BranchOpenPolicy::Imported(ImportedPolicy::new("http://imports/"));
            let err = SafeBranchOpener::new(&engine, &policy)
                .open("http://imports/1")
                .unwrap_err();
            assert!(err.is_fatal());
        }
    }
}
