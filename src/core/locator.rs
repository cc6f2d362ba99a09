//! core::locator
//!
//! URL handling for branch locations.
//!
//! Branch locations travel as strings (they come from the scheduler and go
//! back out on the wire), so the helpers here parse on demand and hand back
//! strings.
//!
//! # Joining
//!
//! [`join`] treats the base as a directory, the way branch locations are
//! interpreted: joining `http://host/a/b` with `c` yields `http://host/a/b/c`,
//! and joining with `/c` yields `http://host/c`. An absolute URL on the right
//! wins outright.
//!
//! # Example
//!
//! ```
//! use branch_puller::core::locator::{join, under_domain, Locator};
//!
//! let loc = Locator::parse("https://code.example.com/~u/p/b").unwrap();
//! assert_eq!(loc.scheme(), "https");
//! assert!(loc.is_under_domain("example.com"));
//!
//! assert_eq!(join("http://host/a/b", "/c").unwrap(), "http://host/c");
//! assert!(under_domain("bazaar.launchpad.net", "launchpad.net"));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

/// Errors from locator parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// The string is not a valid absolute URL.
    #[error("invalid URI '{url}': {reason}")]
    Invalid {
        /// The offending string
        url: String,
        /// Parser diagnosis
        reason: String,
    },

    /// A `file:` URL or path could not be converted.
    #[error("not a local location: {url}")]
    NotLocal {
        /// The offending string
        url: String,
    },
}

/// A parsed branch location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    url: Url,
}

impl Locator {
    /// Parse an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::Invalid` for relative references and malformed
    /// URLs.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        Url::parse(raw)
            .map(|url| Self { url })
            .map_err(|e| LocatorError::Invalid {
                url: raw.to_string(),
                reason: e.to_string(),
            })
    }

    /// Build a `file:` locator from an absolute filesystem path.
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::NotLocal` if the path is relative.
    pub fn from_path(path: &Path) -> Result<Self, LocatorError> {
        Url::from_file_path(path)
            .map(|url| Self { url })
            .map_err(|_| LocatorError::NotLocal {
                url: path.display().to_string(),
            })
    }

    /// The URL scheme, lowercased.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host, lowercased, if the URL has one.
    pub fn host(&self) -> Option<String> {
        self.url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
    }

    /// Whether the host is `domain` or a subdomain of it.
    ///
    /// URLs without a host are under no domain.
    pub fn is_under_domain(&self, domain: &str) -> bool {
        self.host()
            .map(|host| under_domain(&host, domain))
            .unwrap_or(false)
    }

    /// Whether this locator names a local filesystem location.
    pub fn is_local(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// Filesystem path of a `file:` locator.
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::NotLocal` for other schemes.
    pub fn to_file_path(&self) -> Result<PathBuf, LocatorError> {
        if !self.is_local() {
            return Err(LocatorError::NotLocal {
                url: self.url.to_string(),
            });
        }
        self.url.to_file_path().map_err(|_| LocatorError::NotLocal {
            url: self.url.to_string(),
        })
    }

    /// The URL as a string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Whether `host` is `domain` or lies under it.
///
/// Comparison is by whole labels and case-insensitive, so `evil-launchpad.net`
/// is not under `launchpad.net` but `code.Launchpad.NET` is.
pub fn under_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Resolve `relative` against `base`, treating `base` as a directory.
///
/// # Errors
///
/// Returns `LocatorError::Invalid` if `base` is not an absolute URL or the
/// result cannot be formed.
pub fn join(base: &str, relative: &str) -> Result<String, LocatorError> {
    if let Ok(absolute) = Url::parse(relative) {
        return Ok(absolute.to_string());
    }
    let mut base_url = Locator::parse(base)?.url;
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }
    base_url
        .join(relative)
        .map(|u| u.to_string())
        .map_err(|e| LocatorError::Invalid {
            url: relative.to_string(),
            reason: e.to_string(),
        })
}

/// Whether two location strings name the same place, ignoring a trailing `/`.
pub fn same_location(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Convert a location string into a local path.
///
/// Accepts `file:` URLs and absolute paths.
///
/// # Errors
///
/// Returns `LocatorError::NotLocal` for anything else.
pub fn local_path(location: &str) -> Result<PathBuf, LocatorError> {
    match Locator::parse(location) {
        Ok(locator) => locator.to_file_path(),
        Err(_) if Path::new(location).is_absolute() => Ok(PathBuf::from(location)),
        Err(_) => Err(LocatorError::NotLocal {
            url: location.to_string(),
        }),
    }
}

/// Convert an absolute path into a `file:` URL string.
///
/// # Errors
///
/// Returns `LocatorError::NotLocal` if the path is relative.
pub fn file_url(path: &Path) -> Result<String, LocatorError> {
    Locator::from_path(path).map(|l| l.to_string())
}
