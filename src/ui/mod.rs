//! ui
//!
//! Unattended answers to the engine's interactive callbacks.
//!
//! # Design
//!
//! The engine is written for a terminal: it asks before breaking locks and
//! reports progress as it goes. A worker has no terminal, so [`WorkerUi`]
//! answers on its behalf:
//!
//! - A lock-break prompt is approved only if it names this branch's own
//!   lock id (`worker-for-branch-<id>@supermirror`). A lock left by any
//!   other holder is never broken.
//! - Progress of either kind becomes a `progressMade` event, so the
//!   scheduler can tell a slow worker from a hung one.
//! - Log messages become `log` events.
//!
//! The bundle is passed explicitly to every engine operation that may
//! prompt. There is no process-wide hook.

use std::io::Write;

use crate::core::types::{lock_id_for_branch, BranchId};
use crate::protocol::WorkerProtocol;
use crate::vcs::{Activity, UiCallbacks};

/// UI callbacks for one worker, reporting through its protocol.
#[derive(Debug)]
pub struct WorkerUi<'a, W: Write> {
    protocol: &'a WorkerProtocol<W>,
    lock_id: String,
}

impl<'a, W: Write> WorkerUi<'a, W> {
    pub fn new(protocol: &'a WorkerProtocol<W>, branch_id: BranchId) -> Self {
        Self {
            protocol,
            lock_id: lock_id_for_branch(branch_id),
        }
    }

    /// The lock id this UI will agree to break.
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }
}

impl<W: Write> UiCallbacks for WorkerUi<'_, W> {
    fn confirm_lock_break(&self, prompt: &str) -> bool {
        let approved = prompt.contains(&self.lock_id);
        if approved {
            tracing::info!(prompt, "breaking our own stale lock");
        } else {
            tracing::warn!(prompt, lock_id = %self.lock_id, "refusing to break foreign lock");
        }
        approved
    }

    fn progress(&self, activity: Activity) {
        if let Err(e) = self.protocol.progress_made(activity) {
            tracing::warn!(error = %e, "cannot report progress");
        }
    }

    fn log(&self, message: &str) {
        if let Err(e) = self.protocol.log(message) {
            tracing::warn!(error = %e, log_message = message, "cannot send log event");
        }
    }
}
