//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Worker Config
//!
//! Located at (in order of precedence):
//! 1. `$PULLER_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/branch-puller/config.toml`
//! 3. `~/.branch-puller/config.toml`
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they conform to
//! expected formats (e.g., the import root must be an absolute URL).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::locator::Locator;

/// Worker configuration file.
///
/// # Example
///
/// ```toml
/// [vhosts]
/// mainsite_hostname = "launchpad.net"
/// code_hostname = "code.launchpad.net"
/// use_https = true
///
/// [codehosting]
/// blacklisted_hostnames = ["localhost", "127.0.0.1"]
/// blacklist_file = "/srv/puller/blacklist"
///
/// [imports]
/// root_url = "http://bazaar-internal.example/imports/"
/// copy_max_attempts = 5
/// copy_timeout_secs = 300
///
/// [errors]
/// oops_dir = "/var/log/puller/oops"
/// oops_prefix = "PULL"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfigFile {
    /// Public host names of this site
    pub vhosts: Option<VhostsConfig>,

    /// URL policy inputs
    pub codehosting: Option<CodehostingConfig>,

    /// Imported branch settings
    pub imports: Option<ImportsConfig>,

    /// Error report settings
    pub errors: Option<ErrorsConfig>,
}

impl WorkerConfigFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(vhosts) = &self.vhosts {
            vhosts.validate()?;
        }
        if let Some(codehosting) = &self.codehosting {
            codehosting.validate()?;
        }
        if let Some(imports) = &self.imports {
            imports.validate()?;
        }
        if let Some(errors) = &self.errors {
            errors.validate()?;
        }
        Ok(())
    }
}

/// Site host names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VhostsConfig {
    /// Main site domain; nothing under it is ever mirrored
    pub mainsite_hostname: Option<String>,

    /// Host used to build canonical branch URLs in error reports
    pub code_hostname: Option<String>,

    /// Whether canonical URLs use https
    pub use_https: Option<bool>,
}

impl VhostsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("mainsite_hostname", &self.mainsite_hostname),
            ("code_hostname", &self.code_hostname),
        ] {
            if let Some(host) = value {
                if host.trim().is_empty() || host.contains('/') {
                    return Err(ConfigError::InvalidValue(format!(
                        "vhosts.{} must be a bare host name, got '{}'",
                        key, host
                    )));
                }
            }
        }
        Ok(())
    }
}

/// URL policy inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CodehostingConfig {
    /// Host names that must never be mirrored from
    pub blacklisted_hostnames: Option<Vec<String>>,

    /// File with more host names, refreshed by an external process
    pub blacklist_file: Option<PathBuf>,
}

impl CodehostingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(hosts) = &self.blacklisted_hostnames {
            if hosts.iter().any(|h| h.trim().is_empty()) {
                return Err(ConfigError::InvalidValue(
                    "codehosting.blacklisted_hostnames cannot contain empty entries".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Imported branch settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ImportsConfig {
    /// Every imported branch source lives under this URL
    pub root_url: Option<String>,

    /// Raw copy attempts before falling back to a fetch
    pub copy_max_attempts: Option<u32>,

    /// Total time budget for raw copy attempts
    pub copy_timeout_secs: Option<u64>,
}

impl ImportsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.root_url {
            Locator::parse(root).map_err(|e| {
                ConfigError::InvalidValue(format!("imports.root_url: {}", e))
            })?;
        }
        if self.copy_max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue(
                "imports.copy_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Error report settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Directory receiving one JSON report per failure
    pub oops_dir: Option<PathBuf>,

    /// Prefix embedded in diagnostic ids
    pub oops_prefix: Option<String>,
}

impl ErrorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(prefix) = &self.oops_prefix {
            if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::InvalidValue(format!(
                    "errors.oops_prefix must be alphanumeric, got '{}'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}
