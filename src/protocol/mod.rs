//! protocol
//!
//! The worker protocol: how a worker tells its scheduler what happened.
//!
//! # Architecture
//!
//! Every value on the wire is a netstring (`<len>:<bytes>,`). An event is a
//! command name, the number of arguments, then the arguments, all as
//! netstrings:
//!
//! ```text
//! 12:mirrorFailed,1:2,13:Not a branch.,6:OOPS-1,
//! ```
//!
//! Events:
//!
//! | Command          | Arguments                                                  |
//! |------------------|------------------------------------------------------------|
//! | `startMirroring` | none                                                       |
//! | `progressMade`   | none                                                       |
//! | `branchChanged`  | stacked-on URL, revision before, revision after, 3 formats |
//! | `mirrorFailed`   | message, error report id                                   |
//! | `log`            | message                                                    |
//!
//! # Invariants
//!
//! - `startMirroring` comes first
//! - Exactly one of `branchChanged` or `mirrorFailed` comes last; nothing
//!   can be sent after it
//! - Each event is flushed as soon as it is written, so the scheduler sees
//!   liveness immediately
//!
//! # Example
//!
//! ```
//! use branch_puller::protocol::WorkerProtocol;
//!
//! let protocol = WorkerProtocol::new(Vec::new());
//! protocol.start_mirroring().unwrap();
//! protocol.mirror_failed("Not a branch.", "OOPS-1").unwrap();
//! assert!(protocol.log("too late").is_err());
//!
//! let wire = protocol.into_inner();
//! assert!(wire.starts_with(b"14:startMirroring,1:0,"));
//! ```

pub mod netstring;

use std::cell::{Cell, RefCell};
use std::io::Write;

use thiserror::Error;

use crate::vcs::{Activity, FormatStrings};

/// Errors from reading or writing the protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An event was sent after the terminal event.
    #[error("{command} sent after the job finished")]
    AlreadyTerminated { command: String },

    /// The stream does not follow the framing.
    #[error("malformed protocol stream: {0}")]
    Malformed(String),

    /// The stream ended in the middle of a frame or event.
    #[error("protocol stream ended unexpectedly")]
    UnexpectedEof,
}

/// Writes worker events to the scheduler.
///
/// Methods take `&self` so the protocol can be shared between the worker and
/// the UI callbacks handed to the engine.
#[derive(Debug)]
pub struct WorkerProtocol<W: Write> {
    out: RefCell<W>,
    terminated: Cell<bool>,
}

impl<W: Write> WorkerProtocol<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
            terminated: Cell::new(false),
        }
    }

    /// Whether the terminal event has been sent.
    pub fn is_terminated(&self) -> bool {
        self.terminated.get()
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    /// Write one event and flush it.
    pub fn send_event(&self, command: &str, args: &[&str]) -> Result<(), ProtocolError> {
        if self.terminated.get() {
            return Err(ProtocolError::AlreadyTerminated {
                command: command.to_string(),
            });
        }
        let mut out = self.out.borrow_mut();
        netstring::write_netstring(&mut *out, command.as_bytes())?;
        netstring::write_netstring(&mut *out, args.len().to_string().as_bytes())?;
        for arg in args {
            netstring::write_netstring(&mut *out, arg.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn start_mirroring(&self) -> Result<(), ProtocolError> {
        self.send_event("startMirroring", &[])
    }

    /// Report liveness. The activity is not sent; the scheduler only needs
    /// to know the worker is moving.
    pub fn progress_made(&self, activity: Activity) -> Result<(), ProtocolError> {
        tracing::trace!(%activity, "progress");
        self.send_event("progressMade", &[])
    }

    /// Report success. Ends the stream.
    pub fn branch_changed(
        &self,
        stacked_on_url: &str,
        revision_before: &str,
        revision_after: &str,
        formats: &FormatStrings,
    ) -> Result<(), ProtocolError> {
        self.send_event(
            "branchChanged",
            &[
                stacked_on_url,
                revision_before,
                revision_after,
                formats.control.as_str(),
                formats.branch.as_str(),
                formats.repository.as_str(),
            ],
        )?;
        self.terminated.set(true);
        Ok(())
    }

    /// Report failure. Ends the stream.
    pub fn mirror_failed(&self, message: &str, oops_id: &str) -> Result<(), ProtocolError> {
        self.send_event("mirrorFailed", &[message, oops_id])?;
        self.terminated.set(true);
        Ok(())
    }

    pub fn log(&self, message: &str) -> Result<(), ProtocolError> {
        self.send_event("log", &[message])
    }
}

#[cfg(test)]
mod tests {
    use super::netstring::{parse_events, WorkerEvent};
    use super::*;

    fn formats() -> FormatStrings {
        FormatStrings {
            control: "control".into(),
            branch: "branch".into(),
            repository: "repository".into(),
        }
    }

    #[test]
    fn start_event_bytes() {
        let protocol = WorkerProtocol::new(Vec::new());
        protocol.start_mirroring().unwrap();
        assert_eq!(protocol.into_inner(), b"14:startMirroring,1:0,");
    }

    #[test]
    fn failure_event_bytes() {
        let protocol = WorkerProtocol::new(Vec::new());
        protocol.mirror_failed("Not a branch.", "OOPS-1").unwrap();
        assert_eq!(
            protocol.into_inner(),
            b"12:mirrorFailed,1:2,13:Not a branch.,6:OOPS-1,"
        );
    }

    #[test]
    fn progress_has_no_arguments() {
        let protocol = WorkerProtocol::new(Vec::new());
        protocol.progress_made(Activity::Network).unwrap();
        assert_eq!(protocol.into_inner(), b"12:progressMade,1:0,");
    }

    #[test]
    fn success_stream_decodes() {
        let protocol = WorkerProtocol::new(Vec::new());
        protocol.start_mirroring().unwrap();
        protocol.log("Formats differ.").unwrap();
        protocol
            .branch_changed("", "null:", "abc", &formats())
            .unwrap();
        assert!(protocol.is_terminated());

        let events = parse_events(&protocol.into_inner()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            WorkerEvent::BranchChanged {
                stacked_on_url: String::new(),
                revision_before: "null:".into(),
                revision_after: "abc".into(),
                control_format: "control".into(),
                branch_format: "branch".into(),
                repository_format: "repository".into(),
            }
        );
    }

    #[test]
    fn nothing_after_terminal_event() {
        let protocol = WorkerProtocol::new(Vec::new());
        protocol
            .branch_changed("", "a", "b", &formats())
            .unwrap();
        assert!(matches!(
            protocol.progress_made(Activity::ProgressBar),
            Err(ProtocolError::AlreadyTerminated { .. })
        ));
        assert!(matches!(
            protocol.mirror_failed("x", "y"),
            Err(ProtocolError::AlreadyTerminated { .. })
        ));
        assert_eq!(parse_events(&protocol.into_inner()).unwrap().len(), 1);
    }

    #[test]
    fn write_errors_surface() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let protocol = WorkerProtocol::new(Broken);
        assert!(matches!(
            protocol.start_mirroring(),
            Err(ProtocolError::Io(_))
        ));
        assert!(!protocol.is_terminated());
    }
}
