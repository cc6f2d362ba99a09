//! git::interface
//!
//! Engine implementation using git2.
//!
//! This module is the **single doorway** to libgit2. It maps the engine
//! operations the mirroring core consumes onto git repositories and
//! normalizes libgit2 failures into [`VcsError`] categories.
//!
//! # Architecture
//!
//! - A branch is a git repository. `file:` locations are opened directly;
//!   `http(s):` and `git:` locations are reached through an anonymous remote.
//! - The tip revision is the commit `HEAD` resolves to. An unborn `HEAD`
//!   is the null revision.
//! - A branch reference is a location whose `.git` is a file holding
//!   `gitdir: <target>`.
//! - A stacked branch borrows objects through `objects/info/alternates`;
//!   the configured location is kept in `puller.stackedon` so it can be
//!   reported back verbatim.
//! - Pulling fetches every branch and tag with forced refspecs, prunes
//!   refs the source no longer has, then points `HEAD` where the source's
//!   `HEAD` points.
//! - Redirects to another host are never followed, neither when listing
//!   a remote's heads nor when fetching. The policy only ever saw the
//!   original location.
//!
//! # Error Handling
//!
//! - authentication failures become [`VcsError::AuthenticationRequired`]
//! - ssh failures become [`VcsError::InteractiveAuthRequired`]
//! - HTTP 404 becomes [`VcsError::NotBranch`], other statuses [`VcsError::Http`]
//! - net/os/ssl failures become [`VcsError::Transport`]
//! - shallow repositories are [`VcsError::UnsupportedFormat`]
//! - repositories libgit2 refuses to open are [`VcsError::UnknownFormat`]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use walkdir::WalkDir;

use super::lock::{BranchLock, LockError, LOCK_FILE};
use crate::core::locator::{self, Locator};
use crate::core::types::RevisionId;
use crate::vcs::{
    Activity, Branch, BranchFormat, Engine, FormatMarker, TreeEntry, TreeListing, UiCallbacks,
    VcsError,
};

/// Config key holding the stacked-on location as configured.
const STACKED_ON_KEY: &str = "puller.stackedon";

/// libgit2 setting consulted when a remote connects.
const FOLLOW_REDIRECTS_KEY: &str = "http.followRedirects";

/// Extensions whose presence changes the control format.
const KNOWN_EXTENSIONS: &[&str] = &[
    "noop",
    "objectformat",
    "refstorage",
    "worktreeconfig",
    "preciousobjects",
    "partialclone",
];

/// Minimum gap between two network progress signals.
const NETWORK_TICK: Duration = Duration::from_millis(250);

// =============================================================================
// Error mapping
// =============================================================================

fn internal(err: git2::Error) -> VcsError {
    VcsError::Internal {
        message: err.message().to_string(),
    }
}

fn http_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| part.len() == 3)
        .filter_map(|part| part.parse::<u16>().ok())
        .find(|status| (100..600).contains(status))
}

/// Map a failure talking to `url` into an engine error.
fn transport_error(err: git2::Error, url: &str) -> VcsError {
    if err.code() == git2::ErrorCode::Auth {
        return VcsError::AuthenticationRequired {
            url: url.to_string(),
        };
    }
    match err.class() {
        git2::ErrorClass::Ssh => VcsError::InteractiveAuthRequired {
            url: url.to_string(),
        },
        git2::ErrorClass::Http => match http_status(err.message()) {
            Some(404) => VcsError::NotBranch {
                url: url.to_string(),
            },
            Some(401) => VcsError::AuthenticationRequired {
                url: url.to_string(),
            },
            Some(status) => VcsError::Http {
                status,
                message: err.message().to_string(),
            },
            None => VcsError::Transport {
                message: err.message().to_string(),
            },
        },
        git2::ErrorClass::Net | git2::ErrorClass::Os | git2::ErrorClass::Ssl => {
            VcsError::Transport {
                message: err.message().to_string(),
            }
        }
        _ if err.code() == git2::ErrorCode::Certificate => VcsError::Transport {
            message: err.message().to_string(),
        },
        _ => internal(err),
    }
}

fn lock_error(err: LockError) -> VcsError {
    match err {
        LockError::Held { holder } => VcsError::LockContention { holder },
        LockError::Io(e) => e.into(),
    }
}

// =============================================================================
// Locations
// =============================================================================

enum Location {
    Local(PathBuf),
    Remote(String),
}

fn locate(url: &str) -> Result<Location, VcsError> {
    let locator = match Locator::parse(url) {
        Ok(locator) => locator,
        Err(_) if Path::new(url).is_absolute() => return Ok(Location::Local(PathBuf::from(url))),
        Err(e) => {
            return Err(VcsError::Internal {
                message: e.to_string(),
            })
        }
    };
    match locator.scheme() {
        "file" => locator
            .to_file_path()
            .map(Location::Local)
            .map_err(|e| VcsError::Internal {
                message: e.to_string(),
            }),
        "http" | "https" | "git" => Ok(Location::Remote(url.to_string())),
        "ssh" | "git+ssh" | "ssh+git" | "sftp" | "bzr+ssh" => {
            Err(VcsError::InteractiveAuthRequired {
                url: url.to_string(),
            })
        }
        _ => Err(VcsError::UnsupportedTransport {
            url: url.to_string(),
        }),
    }
}

fn local_only(url: &str) -> Result<PathBuf, VcsError> {
    match locate(url)? {
        Location::Local(path) => Ok(path),
        Location::Remote(_) => Err(VcsError::UnsupportedTransport {
            url: url.to_string(),
        }),
    }
}

/// The git directory of the repository stored at `path`, if any.
fn find_git_dir(path: &Path) -> Option<PathBuf> {
    if path.join("HEAD").is_file() && path.join("objects").is_dir() {
        Some(path.to_path_buf())
    } else if path.join(".git").is_dir() {
        Some(path.join(".git"))
    } else {
        None
    }
}

/// The first object directory `objects/info/alternates` names that is gone.
///
/// libgit2 skips such entries silently, leaving every object borrowed from
/// them unreadable.
fn missing_alternate(git_dir: &Path) -> Result<Option<PathBuf>, VcsError> {
    let objects = git_dir.join("objects");
    let contents = match fs::read_to_string(objects.join("info/alternates")) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| objects.join(line))
        .find(|dir| !dir.is_dir()))
}

/// Target of a `gitdir:` file, as a URL.
fn read_gitfile(file: &Path, base_dir: &Path) -> Result<Option<String>, VcsError> {
    let contents = fs::read_to_string(file)?;
    let Some(target) = contents.trim().strip_prefix("gitdir:") else {
        return Ok(None);
    };
    let target = target.trim();
    let to_vcs = |e: locator::LocatorError| VcsError::Internal {
        message: e.to_string(),
    };
    if Path::new(target).is_absolute() {
        return locator::file_url(Path::new(target)).map(Some).map_err(to_vcs);
    }
    let base = locator::file_url(base_dir).map_err(to_vcs)?;
    locator::join(&base, target).map(Some).map_err(to_vcs)
}

// =============================================================================
// Formats
// =============================================================================

/// Control format of a git repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GitFormat {
    version: i32,
    extensions: BTreeMap<String, String>,
}

impl GitFormat {
    fn read(git_dir: &Path) -> Result<Self, VcsError> {
        let config = git2::Config::open(&git_dir.join("config")).map_err(internal)?;
        let version = config.get_i32("core.repositoryformatversion").unwrap_or(0);
        let mut extensions = BTreeMap::new();
        for name in KNOWN_EXTENSIONS {
            if let Ok(value) = config.get_string(&format!("extensions.{}", name)) {
                extensions.insert((*name).to_string(), value.to_ascii_lowercase());
            }
        }
        Ok(Self {
            version,
            extensions,
        })
    }

    fn write(&self, git_dir: &Path) -> Result<(), VcsError> {
        let mut config = git2::Config::open(&git_dir.join("config")).map_err(internal)?;
        config
            .set_i32("core.repositoryformatversion", self.version)
            .map_err(internal)?;
        for (name, value) in &self.extensions {
            config
                .set_str(&format!("extensions.{}", name), value)
                .map_err(internal)?;
        }
        Ok(())
    }

    fn is_legacy(&self) -> bool {
        self.version == 0 && self.extensions.is_empty()
    }

    fn to_branch_format(&self) -> BranchFormat {
        let mut control = format!("git repository format {}", self.version);
        if !self.extensions.is_empty() {
            let listed: Vec<String> = self
                .extensions
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            control.push_str(&format!(" ({})", listed.join(", ")));
        }
        let refs = format!(
            "git refs: {}",
            self.extensions.get("refstorage").map_or("files", String::as_str)
        );
        let objects = format!(
            "git objects: {}",
            self.extensions.get("objectformat").map_or("sha1", String::as_str)
        );

        if self.is_legacy() {
            BranchFormat {
                control: FormatMarker::legacy(control, "Git repository format 0"),
                branch: FormatMarker::legacy(refs, "Git loose and packed refs"),
                repository: FormatMarker::legacy(objects, "Git SHA-1 object store"),
            }
        } else {
            BranchFormat {
                control: FormatMarker::new(control),
                branch: FormatMarker::new(refs),
                repository: FormatMarker::new(objects),
            }
        }
    }
}

// =============================================================================
// Branches
// =============================================================================

/// Where a source's `HEAD` points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeadState {
    Symbolic(String),
    Detached,
    Missing,
}

#[derive(Debug)]
enum GitBranchKind {
    Local { git_dir: PathBuf, format: GitFormat },
    Remote { tip: RevisionId, head: HeadState },
}

/// A git repository opened as a branch.
#[derive(Debug)]
pub struct GitBranch {
    url: String,
    kind: GitBranchKind,
}

impl GitBranch {
    /// The git directory of a local branch.
    pub fn git_dir(&self) -> Option<&Path> {
        match &self.kind {
            GitBranchKind::Local { git_dir, .. } => Some(git_dir),
            GitBranchKind::Remote { .. } => None,
        }
    }

    fn local_git_dir(&self) -> Result<&Path, VcsError> {
        self.git_dir().ok_or_else(|| VcsError::UnsupportedTransport {
            url: self.url.clone(),
        })
    }

    fn repository(&self) -> Result<git2::Repository, VcsError> {
        git2::Repository::open_bare(self.local_git_dir()?).map_err(internal)
    }

    fn git_format(&self) -> GitFormat {
        match &self.kind {
            GitBranchKind::Local { format, .. } => format.clone(),
            GitBranchKind::Remote { .. } => GitFormat::default(),
        }
    }

    /// Fetch source and `HEAD` state, as libgit2 wants them for a fetch.
    fn fetch_source(&self) -> Result<(String, HeadState), VcsError> {
        match &self.kind {
            GitBranchKind::Remote { head, .. } => Ok((self.url.clone(), head.clone())),
            GitBranchKind::Local { git_dir, .. } => {
                let repo = self.repository()?;
                let head = match repo.find_reference("HEAD") {
                    Ok(reference) => match reference.symbolic_target() {
                        Some(target) => HeadState::Symbolic(target.to_string()),
                        None => HeadState::Detached,
                    },
                    Err(_) => HeadState::Missing,
                };
                Ok((git_dir.display().to_string(), head))
            }
        }
    }
}

impl Branch for GitBranch {
    fn url(&self) -> &str {
        &self.url
    }

    fn tip(&self) -> Result<RevisionId, VcsError> {
        match &self.kind {
            GitBranchKind::Remote { tip, .. } => Ok(tip.clone()),
            GitBranchKind::Local { .. } => {
                let repo = self.repository()?;
                let head = match repo.head() {
                    Ok(head) => head,
                    Err(e)
                        if e.code() == git2::ErrorCode::UnbornBranch
                            || e.code() == git2::ErrorCode::NotFound =>
                    {
                        return Ok(RevisionId::null())
                    }
                    Err(e) => return Err(internal(e)),
                };
                let commit = head.peel_to_commit().map_err(internal)?;
                RevisionId::new(commit.id().to_string()).map_err(|e| VcsError::Internal {
                    message: e.to_string(),
                })
            }
        }
    }

    fn format(&self) -> Result<BranchFormat, VcsError> {
        Ok(self.git_format().to_branch_format())
    }

    fn stacked_on_url(&self) -> Result<Option<String>, VcsError> {
        match &self.kind {
            GitBranchKind::Remote { .. } => Ok(None),
            GitBranchKind::Local { git_dir, .. } => {
                let config = git2::Config::open(&git_dir.join("config")).map_err(internal)?;
                Ok(config.get_string(STACKED_ON_KEY).ok())
            }
        }
    }

    fn lock_holder(&self) -> Result<Option<String>, VcsError> {
        match &self.kind {
            GitBranchKind::Remote { .. } => Ok(None),
            GitBranchKind::Local { git_dir, .. } => Ok(BranchLock::inspect(git_dir)
                .map_err(lock_error)?
                .map(|status| status.info.holder)),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Production engine backed by libgit2.
///
/// # Example
///
/// ```no_run
/// use branch_puller::git::GitEngine;
/// use branch_puller::vcs::{Branch, Engine, SilentUi};
///
/// let engine = GitEngine::new("worker-for-branch-1@supermirror");
/// let source = engine.open_branch("https://example.com/project.git").unwrap();
/// let dest = engine.create_branch_like("file:///srv/mirrors/1", &source).unwrap();
/// engine.pull(&dest, &source, true, &SilentUi).unwrap();
/// println!("mirrored {}", dest.tip().unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct GitEngine {
    lock_holder: String,
}

impl GitEngine {
    /// Create an engine that writes `lock_holder` into the locks it takes.
    pub fn new(lock_holder: impl Into<String>) -> Self {
        Self {
            lock_holder: lock_holder.into(),
        }
    }

    /// Lock id written into destination locks.
    pub fn lock_holder(&self) -> &str {
        &self.lock_holder
    }

    fn open_local(&self, url: &str, path: &Path) -> Result<GitBranch, VcsError> {
        if find_git_dir(path).is_none() {
            return Err(VcsError::NotBranch {
                url: url.to_string(),
            });
        }
        let repo = git2::Repository::open_ext(
            path,
            git2::RepositoryOpenFlags::NO_SEARCH,
            &[] as &[&OsStr],
        )
        .map_err(|e| match (e.code(), e.class()) {
            (git2::ErrorCode::NotFound, _) => VcsError::NotBranch {
                url: url.to_string(),
            },
            (_, git2::ErrorClass::Repository) | (_, git2::ErrorClass::Config) => {
                VcsError::UnknownFormat {
                    message: format!("{}: {}", url, e.message()),
                }
            }
            _ => internal(e),
        })?;
        if repo.is_shallow() {
            return Err(VcsError::UnsupportedFormat {
                url: url.to_string(),
            });
        }
        let git_dir = repo.path().to_path_buf();
        if let Some(missing) = missing_alternate(&git_dir)? {
            return Err(VcsError::IncompatibleRepositories {
                message: format!(
                    "{} is stacked on missing objects at {}",
                    url,
                    missing.display()
                ),
            });
        }
        let format = GitFormat::read(&git_dir)?;
        Ok(GitBranch {
            url: url.to_string(),
            kind: GitBranchKind::Local { git_dir, format },
        })
    }

    fn open_remote(&self, url: &str) -> Result<GitBranch, VcsError> {
        // A detached remote follows the first redirect, so list heads
        // through a scratch repository configured to follow none.
        let scratch = tempfile::Builder::new().prefix("puller-ls-").tempdir()?;
        let repo = git2::Repository::init_bare(scratch.path()).map_err(internal)?;
        git2::Config::open(&repo.path().join("config"))
            .and_then(|mut config| config.set_bool(FOLLOW_REDIRECTS_KEY, false))
            .map_err(internal)?;
        let mut remote = repo
            .remote_anonymous(url)
            .map_err(|e| transport_error(e, url))?;
        let mut connection = remote
            .connect_auth(git2::Direction::Fetch, None, None)
            .map_err(|e| transport_error(e, url))?;
        let heads = connection
            .remote()
            .list()
            .map_err(|e| transport_error(e, url))?;

        let mut tip = RevisionId::null();
        let mut head = HeadState::Missing;
        for remote_head in heads.iter().filter(|h| h.name() == "HEAD") {
            if !remote_head.oid().is_zero() {
                tip = RevisionId::new(remote_head.oid().to_string()).map_err(|e| {
                    VcsError::Internal {
                        message: e.to_string(),
                    }
                })?;
            }
            head = match remote_head.symref_target() {
                Some(target) => HeadState::Symbolic(target.to_string()),
                None => HeadState::Detached,
            };
        }
        Ok(GitBranch {
            url: url.to_string(),
            kind: GitBranchKind::Remote { tip, head },
        })
    }
}

impl Engine for GitEngine {
    type Branch = GitBranch;

    fn follow_reference(&self, url: &str) -> Result<Option<String>, VcsError> {
        let path = match locate(url)? {
            Location::Local(path) => path,
            Location::Remote(_) => return Ok(None),
        };
        if path.is_file() {
            let parent = path.parent().unwrap_or(Path::new("/"));
            return read_gitfile(&path, parent);
        }
        let gitfile = path.join(".git");
        if gitfile.is_file() {
            return read_gitfile(&gitfile, &path);
        }
        Ok(None)
    }

    fn declared_stacked_on(&self, url: &str) -> Result<Option<String>, VcsError> {
        let path = match locate(url)? {
            Location::Local(path) => path,
            Location::Remote(_) => return Ok(None),
        };
        let Some(git_dir) = find_git_dir(&path) else {
            return Ok(None);
        };
        if let Ok(config) = git2::Config::open(&git_dir.join("config")) {
            if let Ok(configured) = config.get_string(STACKED_ON_KEY) {
                return Ok(Some(configured));
            }
        }
        let alternates = git_dir.join("objects/info/alternates");
        let contents = match fs::read_to_string(&alternates) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(first) = contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
        else {
            return Ok(None);
        };
        let objects = git_dir.join("objects").join(first);
        let base = objects.parent().unwrap_or(&objects);
        locator::file_url(base)
            .map(Some)
            .map_err(|e| VcsError::Internal {
                message: e.to_string(),
            })
    }

    fn open_branch(&self, url: &str) -> Result<GitBranch, VcsError> {
        match locate(url)? {
            Location::Local(path) => self.open_local(url, &path),
            Location::Remote(remote) => self.open_remote(&remote),
        }
    }

    fn create_branch_like(&self, url: &str, like: &GitBranch) -> Result<GitBranch, VcsError> {
        let path = local_only(url)?;
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true).mkpath(true).no_reinit(true);
        let repo = git2::Repository::init_opts(&path, &opts).map_err(internal)?;
        like.git_format().write(repo.path())?;
        tracing::debug!(url, "created destination repository");
        self.open_local(url, &path)
    }

    fn delete_tree(&self, url: &str) -> Result<(), VcsError> {
        let path = local_only(url)?;
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn supports_raw_copy(&self, source: &str, destination: &str) -> bool {
        matches!(locate(source), Ok(Location::Local(_)))
            && matches!(locate(destination), Ok(Location::Local(_)))
    }

    fn list_files(&self, url: &str) -> Result<TreeListing, VcsError> {
        let root = local_only(url)?;
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| VcsError::Io {
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() || entry.file_name() == LOCK_FILE {
                continue;
            }
            let meta = entry.metadata().map_err(|e| VcsError::Io {
                message: e.to_string(),
            })?;
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            entries.push(TreeEntry {
                path: relative.to_string_lossy().replace('\\', "/"),
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos()),
            });
        }
        Ok(TreeListing::new(entries))
    }

    fn copy_tree(&self, source: &str, destination: &str) -> Result<(), VcsError> {
        let from = local_only(source)?;
        let to = local_only(destination)?;
        fs::create_dir_all(&to)?;
        for entry in WalkDir::new(&from).follow_links(false) {
            let entry = entry.map_err(|e| VcsError::Io {
                message: e.to_string(),
            })?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let relative = entry.path().strip_prefix(&from).unwrap_or(entry.path());
            let target = to.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    fn set_stacked_on_url(&self, branch: &GitBranch, url: &str) -> Result<(), VcsError> {
        let git_dir = branch.local_git_dir()?;
        let resolved = locator::join(&branch.url, url).map_err(|e| VcsError::Internal {
            message: e.to_string(),
        })?;
        let target = locator::local_path(&resolved).map_err(|_| VcsError::UnstackableFormat {
            message: format!("cannot stack on non-local location {}", resolved),
        })?;
        let target_branch = self.open_local(&resolved, &target)?;
        let target_dir = target_branch.local_git_dir()?;
        if target_branch.git_format() != branch.git_format() {
            return Err(VcsError::IncompatibleRepositories {
                message: format!("{} and {} differ in format", branch.url, resolved),
            });
        }
        let target_objects = fs::canonicalize(target_dir.join("objects"))?;

        let info_dir = git_dir.join("objects/info");
        fs::create_dir_all(&info_dir)?;
        fs::write(
            info_dir.join("alternates"),
            format!("{}\n", target_objects.display()),
        )?;
        let mut config = git2::Config::open(&git_dir.join("config")).map_err(internal)?;
        config.set_str(STACKED_ON_KEY, url).map_err(internal)?;
        tracing::debug!(branch = %branch.url, stacked_on = url, "branch stacked");
        Ok(())
    }

    fn break_lock(&self, branch: &GitBranch, ui: &dyn UiCallbacks) -> Result<(), VcsError> {
        let git_dir = branch.local_git_dir()?;
        let Some(status) = BranchLock::inspect(git_dir).map_err(lock_error)? else {
            return Ok(());
        };
        if status.live {
            return Err(VcsError::LockContention {
                holder: status.info.holder,
            });
        }
        let prompt = format!(
            "Break lock {} held by {} (pid {}) since {}?",
            git_dir.join(LOCK_FILE).display(),
            status.info.holder,
            status.info.pid,
            status.info.acquired_at.to_rfc3339(),
        );
        if !ui.confirm_lock_break(&prompt) {
            return Err(VcsError::LockContention {
                holder: status.info.holder,
            });
        }
        BranchLock::break_stale(git_dir).map_err(lock_error)
    }

    fn pull(
        &self,
        destination: &GitBranch,
        source: &GitBranch,
        overwrite: bool,
        ui: &dyn UiCallbacks,
    ) -> Result<(), VcsError> {
        let git_dir = destination.local_git_dir()?;
        let _lock = BranchLock::acquire(git_dir, &self.lock_holder).map_err(lock_error)?;
        ui.progress(Activity::ProgressBar);

        let (fetch_url, head) = source.fetch_source()?;
        let force = if overwrite { "+" } else { "" };
        let mut refspecs = vec![
            format!("{}refs/heads/*:refs/heads/*", force),
            format!("{}refs/tags/*:refs/tags/*", force),
        ];
        if head == HeadState::Detached {
            refspecs.push("+HEAD:refs/puller/head".to_string());
        }

        let repo = destination.repository()?;
        let mut remote = repo
            .remote_anonymous(&fetch_url)
            .map_err(|e| transport_error(e, &source.url))?;

        let last_tick = Cell::new(Instant::now());
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.transfer_progress(|_stats| {
            if last_tick.get().elapsed() >= NETWORK_TICK {
                last_tick.set(Instant::now());
                ui.progress(Activity::Network);
            }
            true
        });
        callbacks.sideband_progress(|_data| {
            ui.progress(Activity::ProgressBar);
            true
        });
        callbacks.update_tips(|_refname, _old, _new| {
            ui.progress(Activity::ProgressBar);
            true
        });

        let mut fetch_opts = git2::FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts.download_tags(git2::AutotagOption::None);
        fetch_opts.follow_redirects(git2::RemoteRedirect::None);
        if overwrite {
            fetch_opts.prune(git2::FetchPrune::On);
        }
        remote
            .fetch(&refspecs, Some(&mut fetch_opts), None)
            .map_err(|e| transport_error(e, &source.url))?;

        match head {
            HeadState::Symbolic(target) => repo.set_head(&target).map_err(internal)?,
            HeadState::Detached => {
                let oid = repo
                    .refname_to_id("refs/puller/head")
                    .map_err(internal)?;
                repo.set_head_detached(oid).map_err(internal)?;
            }
            HeadState::Missing => {}
        }
        tracing::debug!(destination = %destination.url, source = %source.url, "pull complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::SilentUi;
    use tempfile::TempDir;

    fn commit(repo: &git2::Repository, message: &str) -> git2::Oid {
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    fn url(path: &Path) -> String {
        locator::file_url(path).unwrap()
    }

    mod errors {
        use super::*;

        #[test]
        fn status_parsed_from_message() {
            assert_eq!(http_status("unexpected http status code: 404"), Some(404));
            assert_eq!(http_status("request failed with status 503"), Some(503));
            assert_eq!(http_status("connection reset"), None);
        }

        #[test]
        fn auth_code_wins() {
            let err = git2::Error::new(
                git2::ErrorCode::Auth,
                git2::ErrorClass::Http,
                "authentication required",
            );
            assert!(matches!(
                transport_error(err, "http://h/x"),
                VcsError::AuthenticationRequired { .. }
            ));
        }

        #[test]
        fn not_found_status_is_not_branch() {
            let err = git2::Error::new(
                git2::ErrorCode::GenericError,
                git2::ErrorClass::Http,
                "unexpected http status code: 404",
            );
            assert!(matches!(
                transport_error(err, "http://h/x"),
                VcsError::NotBranch { .. }
            ));
        }

        #[test]
        fn server_error_keeps_status() {
            let err = git2::Error::new(
                git2::ErrorCode::GenericError,
                git2::ErrorClass::Http,
                "unexpected http status code: 500",
            );
            assert!(matches!(
                transport_error(err, "http://h/x"),
                VcsError::Http { status: 500, .. }
            ));
        }

        #[test]
        fn socket_failure_is_transport() {
            let err = git2::Error::new(
                git2::ErrorCode::GenericError,
                git2::ErrorClass::Net,
                "failed to connect",
            );
            assert!(matches!(
                transport_error(err, "http://h/x"),
                VcsError::Transport { .. }
            ));
        }

        #[cfg(feature = "https")]
        #[test]
        fn https_transport_available() {
            assert!(git2::Version::get().https());
            let engine = GitEngine::new("holder");
            match engine.open_branch("https://127.0.0.1:1/repo.git") {
                Err(VcsError::Transport { message }) => {
                    assert!(!message.contains("no TLS stream"), "{}", message)
                }
                other => panic!("expected a connection failure, got {:?}", other),
            }
        }

        #[test]
        fn ssh_locations_need_interactive_auth() {
            assert!(matches!(
                locate("ssh://host/repo"),
                Err(VcsError::InteractiveAuthRequired { .. })
            ));
            assert!(matches!(
                locate("svn://host/repo"),
                Err(VcsError::UnsupportedTransport { .. })
            ));
        }
    }

    mod formats {
        use super::*;

        #[test]
        fn version_zero_is_legacy() {
            let format = GitFormat::default().to_branch_format();
            assert_eq!(format.control.report_string(), "Git repository format 0");
            assert_eq!(format.control.descriptor(), "git repository format 0");
            assert_eq!(format.repository.report_string(), "Git SHA-1 object store");
        }

        #[test]
        fn extensions_are_described() {
            let mut format = GitFormat {
                version: 1,
                ..Default::default()
            };
            format.extensions.insert("noop".into(), "true".into());
            let branch_format = format.to_branch_format();
            assert_eq!(
                branch_format.control.report_string(),
                "git repository format 1 (noop=true)"
            );
            assert_eq!(branch_format.branch.report_string(), "git refs: files");
        }

        #[test]
        fn format_round_trips_through_config() {
            let temp = TempDir::new().unwrap();
            let repo = git2::Repository::init_bare(temp.path()).unwrap();
            let mut format = GitFormat {
                version: 1,
                ..Default::default()
            };
            format.extensions.insert("noop".into(), "true".into());
            format.write(repo.path()).unwrap();
            assert_eq!(GitFormat::read(repo.path()).unwrap(), format);
        }
    }

    mod branches {
        use super::*;

        #[test]
        fn empty_directory_is_not_branch() {
            let temp = TempDir::new().unwrap();
            let engine = GitEngine::new("holder");
            assert!(matches!(
                engine.open_branch(&url(temp.path())),
                Err(VcsError::NotBranch { .. })
            ));
        }

        #[test]
        fn unborn_head_is_null() {
            let temp = TempDir::new().unwrap();
            git2::Repository::init_bare(temp.path()).unwrap();
            let engine = GitEngine::new("holder");
            let branch = engine.open_branch(&url(temp.path())).unwrap();
            assert!(branch.tip().unwrap().is_null());
        }

        #[test]
        fn tip_is_head_commit() {
            let temp = TempDir::new().unwrap();
            let repo = git2::Repository::init(temp.path()).unwrap();
            let oid = commit(&repo, "rev1");
            let engine = GitEngine::new("holder");
            let branch = engine.open_branch(&url(temp.path())).unwrap();
            assert_eq!(branch.tip().unwrap().as_str(), oid.to_string());
        }

        #[test]
        fn gitfile_is_a_reference() {
            let temp = TempDir::new().unwrap();
            let target = temp.path().join("target");
            git2::Repository::init_bare(&target).unwrap();
            let reference = temp.path().join("ref");
            fs::create_dir(&reference).unwrap();
            fs::write(reference.join(".git"), "gitdir: ../target\n").unwrap();

            let engine = GitEngine::new("holder");
            assert_eq!(
                engine.follow_reference(&url(&reference)).unwrap(),
                Some(url(&target))
            );
            assert_eq!(engine.follow_reference(&url(&target)).unwrap(), None);
        }

        #[test]
        fn pull_copies_history_and_head() {
            let temp = TempDir::new().unwrap();
            let src_path = temp.path().join("src");
            let src = git2::Repository::init(&src_path).unwrap();
            let oid = commit(&src, "rev1");

            let engine = GitEngine::new("holder");
            let source = engine.open_branch(&url(&src_path)).unwrap();
            let dest_url = url(&temp.path().join("dest"));
            let dest = engine.create_branch_like(&dest_url, &source).unwrap();
            engine.pull(&dest, &source, true, &SilentUi).unwrap();

            assert_eq!(dest.tip().unwrap().as_str(), oid.to_string());
            assert!(!dest.git_dir().unwrap().join(LOCK_FILE).exists());
        }

        #[test]
        fn stacking_writes_alternates() {
            let temp = TempDir::new().unwrap();
            let base = temp.path().join("base");
            git2::Repository::init_bare(&base).unwrap();
            let dest_path = temp.path().join("dest");
            git2::Repository::init_bare(&dest_path).unwrap();

            let engine = GitEngine::new("holder");
            let dest = engine.open_branch(&url(&dest_path)).unwrap();
            engine.set_stacked_on_url(&dest, "../base").unwrap();

            assert_eq!(dest.stacked_on_url().unwrap().as_deref(), Some("../base"));
            assert!(dest_path.join("objects/info/alternates").is_file());
            assert_eq!(
                engine.declared_stacked_on(&url(&dest_path)).unwrap().as_deref(),
                Some("../base")
            );
        }

        #[test]
        fn lost_stacked_on_objects_are_incompatible() {
            let temp = TempDir::new().unwrap();
            let base = temp.path().join("base");
            git2::Repository::init_bare(&base).unwrap();
            let dest_path = temp.path().join("dest");
            git2::Repository::init_bare(&dest_path).unwrap();
            let engine = GitEngine::new("holder");
            let dest = engine.open_branch(&url(&dest_path)).unwrap();
            engine.set_stacked_on_url(&dest, "../base").unwrap();

            fs::remove_dir_all(&base).unwrap();

            assert!(matches!(
                engine.open_branch(&url(&dest_path)),
                Err(VcsError::IncompatibleRepositories { .. })
            ));
        }

        #[test]
        fn stacking_on_missing_branch_is_not_branch() {
            let temp = TempDir::new().unwrap();
            let dest_path = temp.path().join("dest");
            git2::Repository::init_bare(&dest_path).unwrap();
            let engine = GitEngine::new("holder");
            let dest = engine.open_branch(&url(&dest_path)).unwrap();
            assert!(matches!(
                engine.set_stacked_on_url(&dest, "../nowhere"),
                Err(VcsError::NotBranch { .. })
            ));
        }

        #[test]
        fn listing_skips_lock_file() {
            let temp = TempDir::new().unwrap();
            git2::Repository::init_bare(temp.path()).unwrap();
            let engine = GitEngine::new("holder");
            let _lock = BranchLock::acquire(temp.path(), "holder").unwrap();
            let listing = engine.list_files(&url(temp.path())).unwrap();
            assert!(listing.entries().iter().any(|e| e.path == "HEAD"));
            assert!(listing.entries().iter().all(|e| e.path != LOCK_FILE));
        }
    }
}
