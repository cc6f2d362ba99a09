//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! A worker process reads one configuration file. Every setting has a
//! default, so a missing file is not an error.
//!
//! # Locations
//!
//! Searched in order:
//! 1. `$PULLER_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/branch-puller/config.toml`
//! 3. `~/.branch-puller/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use branch_puller::core::config::Config;
//!
//! let config = Config::load().unwrap();
//! println!("never mirror from: {}", config.mainsite_hostname());
//! println!("imports live under: {}", config.imports_root_url());
//! ```

pub mod schema;

pub use schema::WorkerConfigFile;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::blacklist::{ConfiguredBlacklist, HostnameBlacklist};
use crate::core::types::UniqueName;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Default main site domain.
pub const DEFAULT_MAINSITE_HOSTNAME: &str = "launchpad.net";
/// Default host for canonical branch URLs.
pub const DEFAULT_CODE_HOSTNAME: &str = "code.launchpad.net";
/// Default root of imported branch sources.
pub const DEFAULT_IMPORTS_ROOT_URL: &str = "http://localhost:10899/";
/// Default raw copy attempts for imported branches.
pub const DEFAULT_COPY_MAX_ATTEMPTS: u32 = 5;
/// Default raw copy time budget for imported branches.
pub const DEFAULT_COPY_TIMEOUT: Duration = Duration::from_secs(300);
/// Default diagnostic id prefix.
pub const DEFAULT_OOPS_PREFIX: &str = "PULL";

/// Loaded configuration with defaults applied through accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents
    pub file: WorkerConfigFile,
    /// Path the file was loaded from, if any
    loaded_from: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated. Missing files are not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let candidates = Self::search_paths(|key| std::env::var(key).ok(), dirs::home_dir());
        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: WorkerConfigFile =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        file.validate()?;
        Ok(Self {
            file,
            loaded_from: Some(path.to_path_buf()),
        })
    }

    /// Build a config from already-parsed contents.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if validation fails.
    pub fn from_file(file: WorkerConfigFile) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self {
            file,
            loaded_from: None,
        })
    }

    /// Candidate config paths in precedence order.
    fn search_paths(
        env: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(explicit) = env("PULLER_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        if let Some(xdg) = env("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("branch-puller/config.toml"));
        }
        if let Some(home) = home {
            paths.push(home.join(".branch-puller/config.toml"));
        }
        paths
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    /// Main site domain. Nothing under it is ever mirrored.
    pub fn mainsite_hostname(&self) -> &str {
        self.file
            .vhosts
            .as_ref()
            .and_then(|v| v.mainsite_hostname.as_deref())
            .unwrap_or(DEFAULT_MAINSITE_HOSTNAME)
    }

    /// Host used for canonical branch URLs.
    pub fn code_hostname(&self) -> &str {
        self.file
            .vhosts
            .as_ref()
            .and_then(|v| v.code_hostname.as_deref())
            .unwrap_or(DEFAULT_CODE_HOSTNAME)
    }

    /// Whether canonical URLs use https. Defaults to `true`.
    pub fn use_https(&self) -> bool {
        self.file
            .vhosts
            .as_ref()
            .and_then(|v| v.use_https)
            .unwrap_or(true)
    }

    /// Canonical web URL of a branch, for error reports.
    ///
    /// # Example
    ///
    /// ```
    /// use branch_puller::core::config::Config;
    /// use branch_puller::core::types::UniqueName;
    ///
    /// let config = Config::default();
    /// let name = UniqueName::new("~user/project/branch").unwrap();
    /// assert_eq!(
    ///     config.canonical_url_for_branch(&name),
    ///     "https://code.launchpad.net/~user/project/branch"
    /// );
    /// ```
    pub fn canonical_url_for_branch(&self, unique_name: &UniqueName) -> String {
        let scheme = if self.use_https() { "https" } else { "http" };
        format!("{}://{}/{}", scheme, self.code_hostname(), unique_name)
    }

    /// The hostname blacklist, combining static entries and the refresh file.
    pub fn blacklist(&self) -> Arc<dyn HostnameBlacklist> {
        let codehosting = self.file.codehosting.clone().unwrap_or_default();
        Arc::new(ConfiguredBlacklist::new(
            codehosting
                .blacklisted_hostnames
                .unwrap_or_default()
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            codehosting.blacklist_file,
        ))
    }

    /// Root URL every imported branch source must live under.
    pub fn imports_root_url(&self) -> &str {
        self.file
            .imports
            .as_ref()
            .and_then(|i| i.root_url.as_deref())
            .unwrap_or(DEFAULT_IMPORTS_ROOT_URL)
    }

    /// Raw copy attempts for imported branches.
    pub fn copy_max_attempts(&self) -> u32 {
        self.file
            .imports
            .as_ref()
            .and_then(|i| i.copy_max_attempts)
            .unwrap_or(DEFAULT_COPY_MAX_ATTEMPTS)
    }

    /// Raw copy time budget for imported branches.
    pub fn copy_timeout(&self) -> Duration {
        self.file
            .imports
            .as_ref()
            .and_then(|i| i.copy_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COPY_TIMEOUT)
    }

    /// Directory for error reports. Defaults to the system temp directory.
    pub fn oops_dir(&self) -> PathBuf {
        self.file
            .errors
            .as_ref()
            .and_then(|e| e.oops_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("branch-puller-oops"))
    }

    /// Prefix embedded in diagnostic ids.
    pub fn oops_prefix(&self) -> &str {
        self.file
            .errors
            .as_ref()
            .and_then(|e| e.oops_prefix.as_deref())
            .unwrap_or(DEFAULT_OOPS_PREFIX)
    }

    /// Path the configuration was loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }
}
