//! core::blacklist
//!
//! Hostnames that must never be mirrored from.
//!
//! The list is owned by an external process that refreshes it periodically,
//! so [`ConfiguredBlacklist`] re-reads its file on every lookup rather than
//! caching it. The file holds one hostname per line; blank lines and `#`
//! comments are ignored.

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Source of blacklisted hostnames.
pub trait HostnameBlacklist: Debug {
    /// The current blacklist.
    fn hostnames(&self) -> Vec<String>;
}

impl HostnameBlacklist for Vec<String> {
    fn hostnames(&self) -> Vec<String> {
        self.clone()
    }
}

/// Blacklist built from configuration: a static list plus an optional file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredBlacklist {
    hosts: Vec<String>,
    file: Option<PathBuf>,
}

impl ConfiguredBlacklist {
    /// Create a blacklist from static hosts and an optional refreshable file.
    pub fn new(hosts: Vec<String>, file: Option<PathBuf>) -> Self {
        Self { hosts, file }
    }

    fn read_file(&self) -> Vec<String> {
        let Some(path) = &self.file else {
            return Vec::new();
        };
        match fs::read_to_string(path) {
            Ok(contents) => parse_hostnames(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read hostname blacklist");
                Vec::new()
            }
        }
    }
}

impl HostnameBlacklist for ConfiguredBlacklist {
    fn hostnames(&self) -> Vec<String> {
        let mut hosts = self.hosts.clone();
        for host in self.read_file() {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }
}

fn parse_hostnames(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn static_hosts_only() {
        let list = ConfiguredBlacklist::new(vec!["localhost".into()], None);
        assert_eq!(list.hostnames(), vec!["localhost".to_string()]);
    }

    #[test]
    fn file_entries_merged_without_duplicates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blacklist");
        fs::write(&path, "# internal hosts\nlocalhost\n127.0.0.1  # loopback\n\nInternal.Example\n")
            .unwrap();

        let list = ConfiguredBlacklist::new(vec!["localhost".into()], Some(path));
        assert_eq!(
            list.hostnames(),
            vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "internal.example".to_string()
            ]
        );
    }

    #[test]
    fn file_is_reread_on_each_lookup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blacklist");
        fs::write(&path, "a.example\n").unwrap();
        let list = ConfiguredBlacklist::new(Vec::new(), Some(path.clone()));
        assert_eq!(list.hostnames(), vec!["a.example".to_string()]);

        fs::write(&path, "b.example\n").unwrap();
        assert_eq!(list.hostnames(), vec!["b.example".to_string()]);
    }

    #[test]
    fn missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let list = ConfiguredBlacklist::new(Vec::new(), Some(temp.path().join("absent")));
        assert!(list.hostnames().is_empty());
    }

    #[test]
    fn vec_is_a_blacklist() {
        let list = vec!["x.example".to_string()];
        assert_eq!(HostnameBlacklist::hostnames(&list), list);
    }
}
