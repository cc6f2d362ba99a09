//! mirror::policy
//!
//! Branch open policies: which URLs a worker may open, whether branch
//! references are followed, and where destinations are stacked.
//!
//! # Policies
//!
//! | Policy           | URLs accepted                              | References | Stacking             |
//! |------------------|--------------------------------------------|------------|----------------------|
//! | `Mirrored`       | http(s), off-site, not blacklisted         | followed   | project default      |
//! | `Imported`       | under the import root only (else fatal)    | forbidden  | never (fatal)        |
//! | `AcceptAnything` | all                                        | followed   | pre-arranged, if any |
//!
//! The set of policies is closed, so they are variants of one enum rather
//! than implementations of an open trait.
//!
//! # Check order
//!
//! For mirrored branches: this site's own domain first, then the blacklist,
//! then the scheme.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use branch_puller::mirror::policy::{BranchOpenPolicy, MirroredPolicy};
//!
//! let policy = BranchOpenPolicy::Mirrored(MirroredPolicy::new(
//!     "launchpad.net",
//!     Arc::new(vec!["localhost".to_string()]),
//!     Some("/~user/project/trunk".to_string()),
//! ));
//!
//! assert!(policy.check_url("https://example.com/branch").is_ok());
//! assert!(policy.check_url("http://bazaar.launchpad.net/~u/p/b").is_err());
//! assert!(policy.check_url("sftp://example.com/branch").is_err());
//! assert!(policy.should_follow_references());
//! ```

use std::sync::Arc;

use super::errors::{BadUrl, MirrorError};
use crate::core::blacklist::HostnameBlacklist;
use crate::core::config::Config;
use crate::core::job::MirrorJob;
use crate::core::locator::{self, Locator};
use crate::core::types::BranchKind;

/// Schemes that can only authenticate interactively.
const SSH_SCHEMES: &[&str] = &["sftp", "bzr+ssh"];

/// Schemes mirrored branches may be pulled over.
const TRUSTED_SCHEMES: &[&str] = &["http", "https"];

/// Policy for branches pulled from arbitrary external hosts.
#[derive(Debug, Clone)]
pub struct MirroredPolicy {
    mainsite_hostname: String,
    blacklist: Arc<dyn HostnameBlacklist>,
    stacked_on_url: Option<String>,
}

impl MirroredPolicy {
    /// Create a policy. `stacked_on_url` is the project's default
    /// stacked-on location, if it has one.
    pub fn new(
        mainsite_hostname: impl Into<String>,
        blacklist: Arc<dyn HostnameBlacklist>,
        stacked_on_url: Option<String>,
    ) -> Self {
        Self {
            mainsite_hostname: mainsite_hostname.into(),
            blacklist,
            stacked_on_url,
        }
    }

    fn check_url(&self, url: &str) -> Result<(), MirrorError> {
        let locator = Locator::parse(url)?;
        if let Some(host) = locator.host() {
            if locator::under_domain(&host, &self.mainsite_hostname) {
                return Err(BadUrl::SelfHosted {
                    url: url.to_string(),
                }
                .into());
            }
            for blocked in self.blacklist.hostnames() {
                if locator::under_domain(&host, &blocked) {
                    return Err(BadUrl::Blacklisted {
                        url: url.to_string(),
                        host,
                    }
                    .into());
                }
            }
        }
        let scheme = locator.scheme();
        if SSH_SCHEMES.contains(&scheme) {
            return Err(BadUrl::Ssh {
                url: url.to_string(),
            }
            .into());
        }
        if !TRUSTED_SCHEMES.contains(&scheme) {
            return Err(BadUrl::Scheme {
                scheme: scheme.to_string(),
                url: url.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Policy for branches produced by the import pipeline.
#[derive(Debug, Clone)]
pub struct ImportedPolicy {
    imports_root: String,
}

impl ImportedPolicy {
    /// Create a policy accepting only URLs under `imports_root`.
    pub fn new(imports_root: impl Into<String>) -> Self {
        Self {
            imports_root: imports_root.into(),
        }
    }

    fn check_url(&self, url: &str) -> Result<(), MirrorError> {
        if url.starts_with(&self.imports_root) {
            Ok(())
        } else {
            Err(MirrorError::Invariant(format!(
                "import URL {} is outside the import root {}",
                url, self.imports_root
            )))
        }
    }
}

/// Policy that accepts everything, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct AcceptAnythingPolicy {
    stacked_on_url: Option<String>,
}

impl AcceptAnythingPolicy {
    /// Create a policy that stacks destinations on `stacked_on_url`.
    pub fn new(stacked_on_url: Option<String>) -> Self {
        Self { stacked_on_url }
    }
}

/// Decides what a worker may open.
#[derive(Debug, Clone)]
pub enum BranchOpenPolicy {
    Mirrored(MirroredPolicy),
    Imported(ImportedPolicy),
    AcceptAnything(AcceptAnythingPolicy),
}

impl BranchOpenPolicy {
    /// Policy for a scheduled job.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Invariant`] for hosted branches, which are
    /// never pulled.
    pub fn for_job(job: &MirrorJob, config: &Config) -> Result<Self, MirrorError> {
        match job.kind {
            BranchKind::Mirrored => Ok(BranchOpenPolicy::Mirrored(MirroredPolicy::new(
                config.mainsite_hostname(),
                config.blacklist(),
                job.default_stacked_on.clone(),
            ))),
            BranchKind::Imported => Ok(BranchOpenPolicy::Imported(ImportedPolicy::new(
                config.imports_root_url(),
            ))),
            BranchKind::Hosted => Err(MirrorError::Invariant(format!(
                "unexpected branch type: {}",
                job.kind.title()
            ))),
        }
    }

    /// Check that `url` may be opened.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::BadUrl`] for refused URLs
    /// - [`MirrorError::InvalidLocator`] for malformed URLs
    /// - [`MirrorError::Invariant`] for import URLs outside the import root
    pub fn check_url(&self, url: &str) -> Result<(), MirrorError> {
        match self {
            BranchOpenPolicy::Mirrored(policy) => policy.check_url(url),
            BranchOpenPolicy::Imported(policy) => policy.check_url(url),
            BranchOpenPolicy::AcceptAnything(_) => Ok(()),
        }
    }

    /// Whether branch references are followed.
    pub fn should_follow_references(&self) -> bool {
        match self {
            BranchOpenPolicy::Mirrored(_) | BranchOpenPolicy::AcceptAnything(_) => true,
            BranchOpenPolicy::Imported(_) => false,
        }
    }

    /// Location the branch at `destination` should be stacked on.
    ///
    /// The configured location is returned as configured; callers resolve it
    /// against the destination. A location that resolves to the destination
    /// itself yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::InvalidLocator`] if `destination` is not a URL.
    pub fn stacked_on_url_for_destination(
        &self,
        destination: &str,
    ) -> Result<Option<String>, MirrorError> {
        let configured = match self {
            BranchOpenPolicy::Mirrored(policy) => policy.stacked_on_url.as_deref(),
            BranchOpenPolicy::AcceptAnything(policy) => policy.stacked_on_url.as_deref(),
            BranchOpenPolicy::Imported(_) => None,
        };
        let Some(stacked_on) = configured else {
            return Ok(None);
        };
        let resolved = locator::join(destination, stacked_on)?;
        if locator::same_location(&resolved, destination) {
            tracing::debug!(destination, "not stacking a branch on itself");
            return Ok(None);
        }
        Ok(Some(stacked_on.to_string()))
    }

    /// Resolve a stacked-on location declared by the branch at
    /// `branch_base`.
    ///
    /// Returns the resolved URL and whether it must go back through
    /// [`check_url`](Self::check_url) before it is opened.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Invariant`] for imported branches, which are never stacked
    /// - [`MirrorError::InvalidLocator`] if the location cannot be resolved
    pub fn transform_fallback_location(
        &self,
        branch_base: &str,
        url: &str,
    ) -> Result<(String, bool), MirrorError> {
        match self {
            BranchOpenPolicy::Mirrored(_) => Ok((locator::join(branch_base, url)?, true)),
            BranchOpenPolicy::AcceptAnything(_) => Ok((locator::join(branch_base, url)?, false)),
            BranchOpenPolicy::Imported(_) => Err(MirrorError::Invariant(
                "Import branch unexpectedly stacked!".to_string(),
            )),
        }
    }

    /// Whether this is the imported-branch policy.
    pub fn is_imported(&self) -> bool {
        matches!(self, BranchOpenPolicy::Imported(_))
    }
}
