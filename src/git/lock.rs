//! git::lock
//!
//! Write lock on a destination branch.
//!
//! # Architecture
//!
//! A worker holds the lock for the whole of a pull into a destination
//! branch. The lock is a file, `<git_dir>/puller.lock`, holding a JSON
//! [`LockInfo`] that names the holder. While held, the file also carries an
//! OS-level exclusive lock via `fs2`.
//!
//! When a worker dies mid-pull the OS releases the exclusive lock but the
//! file stays behind. Such a lock is *stale*: [`BranchLock::inspect`]
//! reports it as not live, and [`BranchLock::break_stale`] may remove it.
//! A live lock is never broken.
//!
//! # Invariants
//!
//! - The lock file exists exactly while a holder owns the branch or a holder
//!   died owning it
//! - Acquisition never overrides an existing lock file, stale or not
//! - The lock is released and the file removed on drop (RAII pattern)
//!
//! # Example
//!
//! ```
//! use branch_puller::git::lock::BranchLock;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let lock = BranchLock::acquire(dir.path(), "worker-for-branch-7@supermirror").unwrap();
//! assert!(lock.is_held());
//!
//! let status = BranchLock::inspect(dir.path()).unwrap().unwrap();
//! assert!(status.live);
//! assert_eq!(status.info.holder, "worker-for-branch-7@supermirror");
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the lock file inside a git directory.
pub const LOCK_FILE: &str = "puller.lock";

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// A lock file is present.
    #[error("branch is locked by {holder}")]
    Held {
        /// Holder named in the lock file
        holder: String,
    },

    /// I/O error during lock operations.
    #[error("lock i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Lock id of the holder
    pub holder: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
    /// Process id of the holder
    pub pid: u32,
}

/// State of a lock file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub info: LockInfo,
    /// Whether a live process still holds the OS lock.
    pub live: bool,
}

/// An exclusive write lock on a branch.
#[derive(Debug)]
pub struct BranchLock {
    path: PathBuf,
    file: Option<File>,
}

impl BranchLock {
    /// Take the lock on the branch stored in `git_dir`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Held`] if any lock file is present, live or stale
    /// - [`LockError::Io`] if the lock file cannot be written
    pub fn acquire(git_dir: &Path, holder: &str) -> Result<Self, LockError> {
        let path = git_dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Held {
                    holder: read_info(&path)?.holder,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = file.try_lock_exclusive() {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        let info = LockInfo {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
            pid: std::process::id(),
        };
        let json = serde_json::to_vec(&info)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        file.write_all(&json)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), holder, "branch lock acquired");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Look at the lock file of the branch stored in `git_dir`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file exists but cannot be read.
    pub fn inspect(git_dir: &Path) -> Result<Option<LockStatus>, LockError> {
        let path = git_dir.join(LOCK_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let info = read_info(&path)?;
        let live = match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(e) => return Err(e.into()),
        };
        Ok(Some(LockStatus { info, live }))
    }

    /// Remove a stale lock from the branch stored in `git_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] if the lock is live.
    pub fn break_stale(git_dir: &Path) -> Result<(), LockError> {
        match Self::inspect(git_dir)? {
            None => Ok(()),
            Some(status) if status.live => Err(LockError::Held {
                holder: status.info.holder,
            }),
            Some(status) => {
                fs::remove_file(git_dir.join(LOCK_FILE))?;
                tracing::info!(holder = %status.info.holder, "stale branch lock broken");
                Ok(())
            }
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the lock file.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            fs::remove_file(&self.path)?;
            file.unlock()?;
        }
        Ok(())
    }
}

impl Drop for BranchLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs::remove_file(&self.path);
            let _ = file.unlock();
        }
    }
}

/// Read a lock file. A file that does not parse (a holder that died while
/// writing it) is attributed to an unknown holder.
fn read_info(path: &Path) -> Result<LockInfo, LockError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents).unwrap_or_else(|_| LockInfo {
        holder: format!("unknown holder ({})", contents.trim()),
        acquired_at: DateTime::<Utc>::UNIX_EPOCH,
        pid: 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOLDER: &str = "worker-for-branch-1@supermirror";

    fn write_stale(dir: &Path, holder: &str) {
        let info = LockInfo {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
            pid: 1,
        };
        fs::write(dir.join(LOCK_FILE), serde_json::to_vec(&info).unwrap()).unwrap();
    }

    #[test]
    fn acquire_writes_holder() {
        let temp = TempDir::new().unwrap();
        let lock = BranchLock::acquire(temp.path(), HOLDER).expect("acquire");
        assert!(lock.is_held());
        assert_eq!(lock.path(), temp.path().join(LOCK_FILE));
        assert_eq!(read_info(lock.path()).unwrap().holder, HOLDER);
    }

    #[test]
    fn second_acquire_fails() {
        let temp = TempDir::new().unwrap();
        let _lock = BranchLock::acquire(temp.path(), HOLDER).expect("first acquire");
        match BranchLock::acquire(temp.path(), "worker-for-branch-2@supermirror") {
            Err(LockError::Held { holder }) => assert_eq!(holder, HOLDER),
            other => panic!("expected held, got {:?}", other),
        }
    }

    #[test]
    fn drop_removes_file() {
        let temp = TempDir::new().unwrap();
        {
            let _lock = BranchLock::acquire(temp.path(), HOLDER).expect("acquire");
        }
        assert!(!temp.path().join(LOCK_FILE).exists());
        assert!(BranchLock::inspect(temp.path()).unwrap().is_none());
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut lock = BranchLock::acquire(temp.path(), HOLDER).expect("acquire");
        lock.release().expect("first release");
        lock.release().expect("second release");
        assert!(!lock.is_held());
    }

    #[test]
    fn held_lock_is_live() {
        let temp = TempDir::new().unwrap();
        let _lock = BranchLock::acquire(temp.path(), HOLDER).expect("acquire");
        let status = BranchLock::inspect(temp.path()).unwrap().unwrap();
        assert!(status.live);
        assert!(matches!(
            BranchLock::break_stale(temp.path()),
            Err(LockError::Held { .. })
        ));
    }

    #[test]
    fn leftover_file_is_stale() {
        let temp = TempDir::new().unwrap();
        write_stale(temp.path(), HOLDER);
        let status = BranchLock::inspect(temp.path()).unwrap().unwrap();
        assert!(!status.live);
        assert_eq!(status.info.holder, HOLDER);

        assert!(matches!(
            BranchLock::acquire(temp.path(), HOLDER),
            Err(LockError::Held { .. })
        ));

        BranchLock::break_stale(temp.path()).unwrap();
        assert!(BranchLock::acquire(temp.path(), HOLDER).is_ok());
    }

    #[test]
    fn garbled_file_has_unknown_holder() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(LOCK_FILE), "{trunc").unwrap();
        let status = BranchLock::inspect(temp.path()).unwrap().unwrap();
        assert!(status.info.holder.starts_with("unknown holder"));
    }
}
