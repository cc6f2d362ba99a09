//! mirror::worker
//!
//! One mirror attempt for one job, reported to the scheduler.
//!
//! # Architecture
//!
//! A [`PullerWorker`] is built for a job and consumed by
//! [`PullerWorker::mirror`], so it cannot run twice:
//!
//! ```text
//! Created --mirror()--> Mirroring --+--> Succeeded  (branchChanged)
//!                                   +--> Failed     (mirrorFailed)
//! ```
//!
//! Every error raised while mirroring is classified, recorded with the
//! [`ErrorReporter`], and sent as `mirrorFailed` with the report id. The
//! only exception is an invariant violation ([`MirrorError::is_fatal`]),
//! which is returned as [`WorkerError::Fatal`] for the process to die on.
//!
//! The worker never retries. Retrying is the scheduler's business.
//!
//! # Example
//!
//! ```
//! use branch_puller::core::config::Config;
//! use branch_puller::core::job::MirrorJob;
//! use branch_puller::core::types::{BranchId, BranchKind, UniqueName};
//! use branch_puller::mirror::{MirrorOutcome, PullerWorker};
//! use branch_puller::protocol::WorkerProtocol;
//! use branch_puller::report::MemoryReporter;
//! use branch_puller::vcs::mock::MockEngine;
//!
//! let job = MirrorJob::new(
//!     "sftp://example.com/branch",
//!     "file:///srv/mirrors/1",
//!     BranchId::new(1),
//!     UniqueName::new("~user/project/branch").unwrap(),
//!     BranchKind::Mirrored,
//!     None,
//! );
//! let protocol = WorkerProtocol::new(Vec::new());
//! let reporter = MemoryReporter::new();
//! let worker =
//!     PullerWorker::new(job, &Config::default(), MockEngine::new(), &protocol, &reporter).unwrap();
//!
//! match worker.mirror().unwrap() {
//!     MirrorOutcome::Failure { oops_id, .. } => assert_eq!(oops_id, "OOPS-TEST1"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use std::io::Write;

use thiserror::Error;

use super::errors::{classify, FailureKind, MirrorError};
use super::mirrorer::{BranchMirrorer, CopyBounds, MirrorResult};
use super::policy::BranchOpenPolicy;
use crate::core::config::Config;
use crate::core::job::MirrorJob;
use crate::core::types::RevisionId;
use crate::protocol::{ProtocolError, WorkerProtocol};
use crate::report::{error_detail, ErrorReport, ErrorReporter};
use crate::ui::WorkerUi;
use crate::vcs::{Branch, Engine, FormatStrings};

/// Conditions that end the worker instead of being reported.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The surrounding pipeline handed the worker something it must never
    /// produce.
    #[error("fatal: {0}")]
    Fatal(MirrorError),

    /// The scheduler can no longer be told what happened.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result of one mirror attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    Success {
        /// Stacked-on location applied, or empty.
        stacked_on_url: String,
        revision_before: RevisionId,
        revision_after: RevisionId,
        formats: FormatStrings,
    },
    Failure {
        kind: FailureKind,
        message: String,
        oops_id: String,
    },
}

impl MirrorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MirrorOutcome::Success { .. })
    }
}

/// Mirrors one branch and reports the result.
pub struct PullerWorker<'a, E: Engine, W: Write> {
    job: MirrorJob,
    policy: BranchOpenPolicy,
    engine: E,
    protocol: &'a WorkerProtocol<W>,
    reporter: &'a dyn ErrorReporter,
    canonical_url: String,
    copy_bounds: CopyBounds,
}

impl<'a, E: Engine, W: Write> PullerWorker<'a, E, W> {
    /// Build a worker for `job`, with the policy its branch kind calls for.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Fatal`] for jobs no policy covers (hosted
    /// branches).
    pub fn new(
        job: MirrorJob,
        config: &Config,
        engine: E,
        protocol: &'a WorkerProtocol<W>,
        reporter: &'a dyn ErrorReporter,
    ) -> Result<Self, WorkerError> {
        let policy = BranchOpenPolicy::for_job(&job, config).map_err(WorkerError::Fatal)?;
        let canonical_url = config.canonical_url_for_branch(&job.unique_name);
        Ok(Self {
            job,
            policy,
            engine,
            protocol,
            reporter,
            canonical_url,
            copy_bounds: CopyBounds::from_config(config),
        })
    }

    /// Replace the policy chosen from the branch kind.
    pub fn with_policy(mut self, policy: BranchOpenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_copy_bounds(mut self, copy_bounds: CopyBounds) -> Self {
        self.copy_bounds = copy_bounds;
        self
    }

    pub fn job(&self) -> &MirrorJob {
        &self.job
    }

    pub fn policy(&self) -> &BranchOpenPolicy {
        &self.policy
    }

    /// Open the source and mirror it, without lifecycle events or error
    /// reports. Progress and log callbacks still reach the protocol.
    pub fn mirror_without_checks(&self) -> Result<MirrorResult<E::Branch>, MirrorError> {
        let ui = WorkerUi::new(self.protocol, self.job.branch_id);
        let mirrorer = BranchMirrorer::new(&self.engine, &self.policy, &ui)
            .with_copy_bounds(self.copy_bounds);
        let source = mirrorer.open(&self.job.source)?;
        mirrorer.mirror(&source, &self.job.destination)
    }

    fn attempt(&self) -> Result<MirrorOutcome, MirrorError> {
        let result = self.mirror_without_checks()?;
        let revision_after = result.destination.tip()?;
        let formats = result.destination.format()?.report_strings();
        Ok(MirrorOutcome::Success {
            stacked_on_url: result.stacked_on_url,
            revision_before: result.revision_before,
            revision_after,
            formats,
        })
    }

    fn report_failure(&self, err: &MirrorError) -> MirrorOutcome {
        let classified = classify(err, &self.job);
        let report = ErrorReport {
            branch_id: self.job.branch_id,
            source: self.job.source.clone(),
            destination: self.job.destination.clone(),
            url: self.canonical_url.clone(),
            kind: classified.kind.to_string(),
            explanation: classified.message.clone(),
            detail: error_detail(err),
        };
        let oops_id = self.reporter.record(&report);
        MirrorOutcome::Failure {
            kind: classified.kind,
            message: classified.message,
            oops_id,
        }
    }

    /// Mirror the job's branch and report the outcome.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Fatal`] on invariant violations
    /// - [`WorkerError::Protocol`] if events cannot be written
    pub fn mirror(self) -> Result<MirrorOutcome, WorkerError> {
        tracing::info!(
            branch_id = %self.job.branch_id,
            source = %self.job.source,
            destination = %self.job.destination,
            "mirroring"
        );
        self.protocol.start_mirroring()?;

        let outcome = match self.attempt() {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => {
                tracing::error!(branch_id = %self.job.branch_id, error = %e, "invariant violated");
                return Err(WorkerError::Fatal(e));
            }
            Err(e) => self.report_failure(&e),
        };

        match &outcome {
            MirrorOutcome::Success {
                stacked_on_url,
                revision_before,
                revision_after,
                formats,
            } => {
                self.protocol.branch_changed(
                    stacked_on_url,
                    revision_before.as_str(),
                    revision_after.as_str(),
                    formats,
                )?;
                tracing::info!(
                    branch_id = %self.job.branch_id,
                    %revision_before,
                    %revision_after,
                    "branch mirrored"
                );
            }
            MirrorOutcome::Failure {
                kind,
                message,
                oops_id,
            } => {
                self.protocol.mirror_failed(message, oops_id)?;
                tracing::warn!(
                    branch_id = %self.job.branch_id,
                    %kind,
                    oops_id = %oops_id,
                    explanation = %message,
                    "mirror failed"
                );
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BranchId, BranchKind, UniqueName};
    use crate::mirror::policy::AcceptAnythingPolicy;
    use crate::protocol::netstring::{parse_events, WorkerEvent};
    use crate::report::MemoryReporter;
    use crate::vcs::mock::{MockBranchState, MockEngine};
    use crate::vcs::VcsError;

    const SOURCE: &str = "http://example.com/src";
    const DEST: &str = "file:///srv/mirrors/00000001";

    fn job(source: &str, kind: BranchKind) -> MirrorJob {
        MirrorJob::new(
            source,
            DEST,
            BranchId::new(1),
            UniqueName::new("~user/project/branch").unwrap(),
            kind,
            None,
        )
    }

    fn run(job: MirrorJob, engine: MockEngine) -> (Result<MirrorOutcome, WorkerError>, Vec<WorkerEvent>, MemoryReporter) {
        let protocol = WorkerProtocol::new(Vec::new());
        let reporter = MemoryReporter::new();
        let result = PullerWorker::new(job, &Config::default(), engine, &protocol, &reporter)
            .and_then(|worker| worker.mirror());
        let events = parse_events(&protocol.into_inner()).unwrap();
        (result, events, reporter)
    }

    mod success {
        use super::*;

        #[test]
        fn reports_branch_changed() {
            let engine = MockEngine::new().with_branch(SOURCE, MockBranchState::new("rev-1"));
            let (result, events, reporter) = run(job(SOURCE, BranchKind::Mirrored), engine);

            let outcome = result.unwrap();
            assert!(outcome.is_success());
            assert_eq!(events.first(), Some(&WorkerEvent::StartMirroring));
            match events.last() {
                Some(WorkerEvent::BranchChanged {
                    stacked_on_url,
                    revision_before,
                    revision_after,
                    control_format,
                    ..
                }) => {
                    assert_eq!(stacked_on_url, "");
                    assert_eq!(revision_before, "null:");
                    assert_eq!(revision_after, "rev-1");
                    assert_eq!(control_format, "Mock control format 1");
                }
                other => panic!("expected branchChanged, got {:?}", other),
            }
            assert!(events[1..events.len() - 1]
                .iter()
                .all(|e| *e == WorkerEvent::ProgressMade));
            assert!(reporter.reports().is_empty());
        }

        #[test]
        fn second_mirror_is_unchanged() {
            let engine = MockEngine::new().with_branch(SOURCE, MockBranchState::new("rev-1"));
            run(job(SOURCE, BranchKind::Mirrored), engine.clone());
            let (result, _, _) = run(job(SOURCE, BranchKind::Mirrored), engine);
            match result.unwrap() {
                MirrorOutcome::Success {
                    revision_before,
                    revision_after,
                    ..
                } => assert_eq!(revision_before, revision_after),
                other => panic!("expected success, got {:?}", other),
            }
        }

        #[test]
        fn own_stale_lock_broken() {
            let engine = MockEngine::new()
                .with_branch(SOURCE, MockBranchState::new("rev-2"))
                .with_branch(
                    DEST,
                    MockBranchState::new("rev-1").locked_by("worker-for-branch-1@supermirror"),
                );
            let (result, _, _) = run(job(SOURCE, BranchKind::Mirrored), engine.clone());
            assert!(result.unwrap().is_success());
            assert_eq!(engine.branch_state(DEST).unwrap().tip.as_str(), "rev-2");
        }

        #[test]
        fn mirror_without_checks_sends_no_lifecycle_events() {
            let engine = MockEngine::new().with_branch(SOURCE, MockBranchState::new("rev-1"));
            let protocol = WorkerProtocol::new(Vec::new());
            let reporter = MemoryReporter::new();
            let worker = PullerWorker::new(
                job(SOURCE, BranchKind::Mirrored),
                &Config::default(),
                engine,
                &protocol,
                &reporter,
            )
            .unwrap();

            let result = worker.mirror_without_checks().unwrap();
            assert_eq!(result.destination.tip().unwrap().as_str(), "rev-1");
            assert_eq!(result.stacked_on_url, "");
            drop(worker);
            let events = parse_events(&protocol.into_inner()).unwrap();
            assert!(events.iter().all(|e| *e == WorkerEvent::ProgressMade));
        }

        #[test]
        fn policy_override_allows_local_sources() {
            let source = "file:///srv/src";
            let engine = MockEngine::new().with_branch(source, MockBranchState::new("rev-1"));
            let protocol = WorkerProtocol::new(Vec::new());
            let reporter = MemoryReporter::new();
            let outcome = PullerWorker::new(
                job(source, BranchKind::Mirrored),
                &Config::default(),
                engine,
                &protocol,
                &reporter,
            )
            .unwrap()
            .with_policy(BranchOpenPolicy::AcceptAnything(AcceptAnythingPolicy::default()))
            .mirror()
            .unwrap();
            assert!(outcome.is_success());
        }
    }

    mod failure {
        use super::*;

        #[test]
        fn ssh_source_reported() {
            let (result, events, reporter) =
                run(job("sftp://example.com/b", BranchKind::Mirrored), MockEngine::new());

            match result.unwrap() {
                MirrorOutcome::Failure { kind, oops_id, .. } => {
                    assert_eq!(kind, FailureKind::DisallowedScheme);
                    assert_eq!(oops_id, "OOPS-TEST1");
                }
                other => panic!("expected failure, got {:?}", other),
            }
            assert_eq!(events.len(), 2);
            assert!(matches!(
                &events[1],
                WorkerEvent::MirrorFailed { message, oops_id }
                    if message.contains("HTTP") && oops_id == "OOPS-TEST1"
            ));

            let reports = reporter.reports();
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].branch_id, BranchId::new(1));
            assert_eq!(reports[0].source, "sftp://example.com/b");
            assert_eq!(reports[0].destination, DEST);
            assert_eq!(reports[0].kind, "DisallowedScheme");
            assert_eq!(reports[0].url, "https://code.launchpad.net/~user/project/branch");
        }

        #[test]
        fn blacklisted_host_kept_out_of_message() {
            let blacklist: std::sync::Arc<dyn crate::core::blacklist::HostnameBlacklist> =
                std::sync::Arc::new(vec!["blocked.example".to_string()]);
            let policy = BranchOpenPolicy::Mirrored(crate::mirror::policy::MirroredPolicy::new(
                "launchpad.net",
                blacklist,
                None,
            ));
            let protocol = WorkerProtocol::new(Vec::new());
            let reporter = MemoryReporter::new();
            let outcome = PullerWorker::new(
                job("http://git.blocked.example/b", BranchKind::Mirrored),
                &Config::default(),
                MockEngine::new(),
                &protocol,
                &reporter,
            )
            .unwrap()
            .with_policy(policy)
            .mirror()
            .unwrap();

            match outcome {
                MirrorOutcome::Failure { kind, message, .. } => {
                    assert_eq!(kind, FailureKind::SelfMirrorForbidden);
                    assert_eq!(message, crate::mirror::errors::SELF_MIRROR_MESSAGE);
                }
                other => panic!("expected failure, got {:?}", other),
            }
            let reports = reporter.reports();
            assert_eq!(reports.len(), 1);
            assert!(reports[0].detail.contains("blocked.example"));
        }

        #[test]
        fn missing_source_names_branch() {
            let (result, events, _) = run(job(SOURCE, BranchKind::Mirrored), MockEngine::new());
            assert!(matches!(
                result.unwrap(),
                MirrorOutcome::Failure { kind: FailureKind::NotFound, .. }
            ));
            assert!(matches!(
                events.last(),
                Some(WorkerEvent::MirrorFailed { message, .. })
                    if message == "Not a branch: \"lp:~user/project/branch\"."
            ));
        }

        #[test]
        fn foreign_lock_not_broken() {
            let engine = MockEngine::new()
                .with_branch(SOURCE, MockBranchState::new("rev-2"))
                .with_branch(
                    DEST,
                    MockBranchState::new("rev-1").locked_by("worker-for-branch-2@supermirror"),
                );
            let (result, _, _) = run(job(SOURCE, BranchKind::Mirrored), engine.clone());
            assert!(matches!(
                result.unwrap(),
                MirrorOutcome::Failure { kind: FailureKind::GenericEngineError, .. }
            ));
            let dest = engine.branch_state(DEST).unwrap();
            assert_eq!(dest.tip.as_str(), "rev-1");
            assert!(dest.lock_holder.is_some());
        }

        #[test]
        fn transport_error_reported() {
            let engine = MockEngine::new()
                .with_branch(SOURCE, MockBranchState::new("rev-1"))
                .fail_on(crate::vcs::mock::FailOn::Pull(VcsError::Transport {
                    message: "Connection reset".into(),
                }));
            let (result, _, reporter) = run(job(SOURCE, BranchKind::Mirrored), engine);
            assert!(matches!(
                result.unwrap(),
                MirrorOutcome::Failure { kind: FailureKind::TransportError, .. }
            ));
            assert!(reporter.reports()[0].detail.contains("Connection reset"));
        }
    }

    mod fatal {
        use super::*;

        #[test]
        fn hosted_job_rejected_before_start() {
            let (result, events, _) = run(job(SOURCE, BranchKind::Hosted), MockEngine::new());
            assert!(matches!(result, Err(WorkerError::Fatal(_))));
            assert!(events.is_empty());
        }

        #[test]
        fn import_outside_root_is_not_reported() {
            let (result, events, reporter) =
                run(job("http://elsewhere.example/1", BranchKind::Imported), MockEngine::new());
            assert!(matches!(result, Err(WorkerError::Fatal(MirrorError::Invariant(_)))));
            assert_eq!(events, vec![WorkerEvent::StartMirroring]);
            assert!(reporter.reports().is_empty());
        }
    }
}
