//! mirror::errors
//!
//! Errors raised while opening and mirroring branches, and their
//! classification into the failure taxonomy reported to the scheduler.
//!
//! # Fatal vs reported
//!
//! Every [`MirrorError`] is turned into a [`Classified`] failure by
//! [`classify`], except [`MirrorError::Invariant`]. An invariant violation
//! means the surrounding pipeline handed the worker something it must never
//! produce, and the worker lets it terminate the process instead.

use std::fmt;

use thiserror::Error;

use crate::core::job::MirrorJob;
use crate::core::locator::LocatorError;
use crate::core::types::BranchKind;
use crate::vcs::VcsError;

/// A URL the open policy refuses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BadUrl {
    /// The URL is on this site.
    #[error("URL is on this site: {url}")]
    SelfHosted { url: String },

    /// The URL's host is blacklisted.
    #[error("URL host {host} is blacklisted: {url}")]
    Blacklisted { url: String, host: String },

    /// The URL uses an ssh-based scheme.
    #[error("URL uses an ssh scheme: {url}")]
    Ssh { url: String },

    /// The URL uses a scheme that is not trusted.
    #[error("URL scheme {scheme} is not trusted: {url}")]
    Scheme { scheme: String, url: String },
}

/// Errors from opening or mirroring a branch.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    BadUrl(#[from] BadUrl),

    #[error(transparent)]
    InvalidLocator(#[from] LocatorError),

    /// A branch reference was found where references are not followed.
    #[error("branch reference not allowed: {url}")]
    BranchReferenceForbidden { url: String },

    /// A reference or stacking chain revisits a location.
    #[error("circular branch reference at {url}")]
    BranchLoop { url: String },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// A programming error in the surrounding pipeline.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl MirrorError {
    /// Whether this error must terminate the worker instead of being
    /// reported as a failed attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirrorError::Invariant(_))
    }
}

/// Category of a failed mirror attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    AuthenticationRequired,
    TransportError,
    UnsupportedFormat,
    UnknownFormat,
    DisallowedScheme,
    SelfMirrorForbidden,
    UntrustedScheme,
    NotFound,
    BranchReferenceForbidden,
    BranchLoop,
    GenericEngineError,
    InvalidLocator,
}

impl FailureKind {
    /// Stable name used in error reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthenticationRequired => "AuthenticationRequired",
            FailureKind::TransportError => "TransportError",
            FailureKind::UnsupportedFormat => "UnsupportedFormat",
            FailureKind::UnknownFormat => "UnknownFormat",
            FailureKind::DisallowedScheme => "DisallowedScheme",
            FailureKind::SelfMirrorForbidden => "SelfMirrorForbidden",
            FailureKind::UntrustedScheme => "UntrustedScheme",
            FailureKind::NotFound => "NotFound",
            FailureKind::BranchReferenceForbidden => "BranchReferenceForbidden",
            FailureKind::BranchLoop => "BranchLoop",
            FailureKind::GenericEngineError => "GenericEngineError",
            FailureKind::InvalidLocator => "InvalidLocator",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure ready to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: FailureKind,
    /// Message shown to the branch owner.
    pub message: String,
}

impl Classified {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Message for formats that are too old or partial to mirror.
pub const UNSUPPORTED_FORMAT_MESSAGE: &str = "Branches in this format are not supported. \
     Please upgrade the branch to a complete, non-shallow repository.";

/// Message for ssh-based locations.
pub const DISALLOWED_SCHEME_MESSAGE: &str = "Branches cannot be mirrored from SFTP and SSH URLs. \
     Please register a HTTP location for this branch.";

/// Message for locations on this site.
pub const SELF_MIRROR_MESSAGE: &str = "This site does not mirror branches from itself.";

/// Translate an error into the failure reported for `job`.
pub fn classify(err: &MirrorError, job: &MirrorJob) -> Classified {
    match err {
        MirrorError::BadUrl(bad) => match bad {
            // The blacklisted host goes into the report detail only.
            BadUrl::SelfHosted { .. } | BadUrl::Blacklisted { .. } => {
                Classified::new(FailureKind::SelfMirrorForbidden, SELF_MIRROR_MESSAGE)
            }
            BadUrl::Ssh { .. } => {
                Classified::new(FailureKind::DisallowedScheme, DISALLOWED_SCHEME_MESSAGE)
            }
            BadUrl::Scheme { scheme, .. } => Classified::new(
                FailureKind::UntrustedScheme,
                format!("Branches cannot be mirrored from {}:// URLs.", scheme),
            ),
        },
        MirrorError::InvalidLocator(e) => Classified::new(FailureKind::InvalidLocator, e.to_string()),
        MirrorError::BranchReferenceForbidden { .. } => Classified::new(
            FailureKind::BranchReferenceForbidden,
            format!(
                "Branch references are not allowed for branches of type {}.",
                job.kind.title()
            ),
        ),
        MirrorError::BranchLoop { .. } => {
            Classified::new(FailureKind::BranchLoop, "Circular branch reference.")
        }
        MirrorError::Vcs(e) => classify_vcs(e, job),
        MirrorError::Invariant(message) => {
            Classified::new(FailureKind::GenericEngineError, message.clone())
        }
    }
}

fn classify_vcs(err: &VcsError, job: &MirrorJob) -> Classified {
    match err {
        VcsError::NotBranch { .. } => {
            let message = match job.kind {
                BranchKind::Mirrored => format!("Not a branch: \"lp:{}\".", job.unique_name),
                BranchKind::Imported => "Not a branch.".to_string(),
                BranchKind::Hosted => err.to_string(),
            };
            Classified::new(FailureKind::NotFound, message)
        }
        VcsError::AuthenticationRequired { .. } => {
            Classified::new(FailureKind::AuthenticationRequired, "Authentication required.")
        }
        VcsError::Http { message, .. } => {
            Classified::new(FailureKind::TransportError, message.clone())
        }
        VcsError::Transport { message } => Classified::new(
            FailureKind::TransportError,
            format!("A socket error occurred: {}", message),
        ),
        VcsError::UnsupportedFormat { .. } => {
            Classified::new(FailureKind::UnsupportedFormat, UNSUPPORTED_FORMAT_MESSAGE)
        }
        VcsError::UnknownFormat { message } => {
            Classified::new(FailureKind::UnknownFormat, message.clone())
        }
        VcsError::InteractiveAuthRequired { .. } => {
            Classified::new(FailureKind::DisallowedScheme, DISALLOWED_SCHEME_MESSAGE)
        }
        VcsError::IncompatibleRepositories { .. }
        | VcsError::UnstackableFormat { .. }
        | VcsError::UnsupportedTransport { .. }
        | VcsError::LockContention { .. }
        | VcsError::Io { .. }
        | VcsError::Internal { .. } => {
            Classified::new(FailureKind::GenericEngineError, err.to_string())
        }
    }
}
