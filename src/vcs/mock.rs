//! vcs::mock
//!
//! In-memory engine for deterministic testing.
//!
//! # Design
//!
//! Locations are keyed by URL string and hold either a branch, a branch
//! reference, or something that is not a branch at all. Operations are
//! recorded so tests can assert on the exact sequence the mirrorer
//! performed, and failures can be injected per operation.
//!
//! # Example
//!
//! ```
//! use branch_puller::vcs::mock::{MockBranchState, MockEngine};
//! use branch_puller::vcs::{Branch, Engine, SilentUi};
//!
//! let engine = MockEngine::new()
//!     .with_branch("http://example.com/src", MockBranchState::new("rev-1"));
//!
//! let source = engine.open_branch("http://example.com/src").unwrap();
//! let dest = engine.create_branch_like("file:///srv/dest", &source).unwrap();
//! engine.pull(&dest, &source, true, &SilentUi).unwrap();
//! assert_eq!(dest.tip().unwrap().as_str(), "rev-1");
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::format::{BranchFormat, FormatMarker};
use super::traits::{Activity, Branch, Engine, TreeListing, UiCallbacks, VcsError};
use crate::core::locator;
use crate::core::types::RevisionId;

/// Format given to mock branches unless a test says otherwise.
pub fn default_format() -> BranchFormat {
    BranchFormat {
        control: FormatMarker::legacy("mock-control-1", "Mock control format 1"),
        branch: FormatMarker::new("mock-branch-1"),
        repository: FormatMarker::new("mock-repository-1"),
    }
}

/// Stored state of one mock branch.
#[derive(Debug, Clone)]
pub struct MockBranchState {
    pub tip: RevisionId,
    pub format: BranchFormat,
    pub stacked_on: Option<String>,
    pub lock_holder: Option<String>,
    /// Refuse to be stacked on anything.
    pub unstackable: bool,
}

impl MockBranchState {
    /// A branch at `tip` in the default format. An unparseable tip becomes
    /// the null revision.
    pub fn new(tip: &str) -> Self {
        Self {
            tip: RevisionId::new(tip).unwrap_or_else(|_| RevisionId::null()),
            format: default_format(),
            stacked_on: None,
            lock_holder: None,
            unstackable: false,
        }
    }

    /// A branch with no history.
    pub fn empty() -> Self {
        Self::new(RevisionId::NULL)
    }

    /// Use a specific format.
    pub fn with_format(mut self, format: BranchFormat) -> Self {
        self.format = format;
        self
    }

    /// Declare a stacked-on location.
    pub fn stacked_on(mut self, url: impl Into<String>) -> Self {
        self.stacked_on = Some(url.into());
        self
    }

    /// Leave a write lock behind.
    pub fn locked_by(mut self, holder: impl Into<String>) -> Self {
        self.lock_holder = Some(holder.into());
        self
    }
}

/// What lives at a mock location.
#[derive(Debug, Clone)]
pub enum MockLocation {
    Branch(MockBranchState),
    Reference(String),
    /// Something exists but it is not a branch.
    Junk,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    /// Fail opening this URL with the given error.
    Open { url: String, error: VcsError },
    /// Fail every pull with the given error.
    Pull(VcsError),
    /// Fail every stacking request with the given error.
    SetStackedOn(VcsError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    FollowReference { url: String },
    DeclaredStackedOn { url: String },
    Open { url: String },
    Create { url: String },
    Delete { url: String },
    ListFiles { url: String },
    CopyTree { source: String, destination: String },
    SetStackedOn { url: String, stacked_on: String },
    BreakLock { url: String, holder: String },
    Pull { destination: String, source: String, overwrite: bool },
}

#[derive(Debug, Default)]
struct MockEngineInner {
    locations: HashMap<String, MockLocation>,
    fail_on: Vec<FailOn>,
    operations: Vec<MockOperation>,
    listings: HashMap<String, VecDeque<TreeListing>>,
    raw_copy: bool,
}

/// Mock engine for testing.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// worker owns another.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<MockEngineInner>>,
}

/// Handle to a mock branch.
#[derive(Clone)]
pub struct MockBranch {
    url: String,
    inner: Arc<Mutex<MockEngineInner>>,
}

impl fmt::Debug for MockBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBranch").field("url", &self.url).finish()
    }
}

fn lock(inner: &Mutex<MockEngineInner>) -> MutexGuard<'_, MockEngineInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockEngine {
    /// Create an engine with no locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch.
    pub fn with_branch(self, url: impl Into<String>, state: MockBranchState) -> Self {
        self.put(url, MockLocation::Branch(state));
        self
    }

    /// Add a branch reference pointing at `target`.
    pub fn with_reference(self, url: impl Into<String>, target: impl Into<String>) -> Self {
        self.put(url, MockLocation::Reference(target.into()));
        self
    }

    /// Add a location that exists but holds no branch.
    pub fn with_junk(self, url: impl Into<String>) -> Self {
        self.put(url, MockLocation::Junk);
        self
    }

    /// Inject a failure.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        lock(&self.inner).fail_on.push(fail_on);
        self
    }

    /// Allow raw copies between locations.
    pub fn with_raw_copy(self) -> Self {
        lock(&self.inner).raw_copy = true;
        self
    }

    /// Listings returned by successive `list_files(url)` calls. The last one
    /// repeats once the script runs out.
    pub fn with_listings(self, url: impl Into<String>, listings: Vec<TreeListing>) -> Self {
        lock(&self.inner)
            .listings
            .insert(url.into(), listings.into_iter().collect());
        self
    }

    /// Replace whatever lives at `url`.
    pub fn put(&self, url: impl Into<String>, location: MockLocation) {
        lock(&self.inner).locations.insert(url.into(), location);
    }

    /// Update the tip of an existing branch.
    pub fn set_tip(&self, url: &str, tip: &str) {
        if let Some(MockLocation::Branch(state)) = lock(&self.inner).locations.get_mut(url) {
            state.tip = RevisionId::new(tip).unwrap_or_else(|_| RevisionId::null());
        }
    }

    /// Current state of the branch at `url`.
    pub fn branch_state(&self, url: &str) -> Option<MockBranchState> {
        match lock(&self.inner).locations.get(url) {
            Some(MockLocation::Branch(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Whether anything lives at `url`.
    pub fn exists(&self, url: &str) -> bool {
        lock(&self.inner).locations.contains_key(url)
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        lock(&self.inner).operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        lock(&self.inner).operations.clear();
    }

    fn record(&self, op: MockOperation) {
        lock(&self.inner).operations.push(op);
    }

    fn branch(&self, url: &str) -> MockBranch {
        MockBranch {
            url: url.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MockBranch {
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MockBranchState) -> T,
    ) -> Result<T, VcsError> {
        match lock(&self.inner).locations.get_mut(&self.url) {
            Some(MockLocation::Branch(state)) => Ok(f(state)),
            _ => Err(VcsError::NotBranch {
                url: self.url.clone(),
            }),
        }
    }
}

impl Branch for MockBranch {
    fn url(&self) -> &str {
        &self.url
    }

    fn tip(&self) -> Result<RevisionId, VcsError> {
        self.with_state(|s| s.tip.clone())
    }

    fn format(&self) -> Result<BranchFormat, VcsError> {
        self.with_state(|s| s.format.clone())
    }

    fn stacked_on_url(&self) -> Result<Option<String>, VcsError> {
        self.with_state(|s| s.stacked_on.clone())
    }

    fn lock_holder(&self) -> Result<Option<String>, VcsError> {
        self.with_state(|s| s.lock_holder.clone())
    }
}

impl Engine for MockEngine {
    type Branch = MockBranch;

    fn follow_reference(&self, url: &str) -> Result<Option<String>, VcsError> {
        self.record(MockOperation::FollowReference {
            url: url.to_string(),
        });
        match lock(&self.inner).locations.get(url) {
            Some(MockLocation::Reference(target)) => Ok(Some(target.clone())),
            _ => Ok(None),
        }
    }

    fn declared_stacked_on(&self, url: &str) -> Result<Option<String>, VcsError> {
        self.record(MockOperation::DeclaredStackedOn {
            url: url.to_string(),
        });
        match lock(&self.inner).locations.get(url) {
            Some(MockLocation::Branch(state)) => Ok(state.stacked_on.clone()),
            _ => Ok(None),
        }
    }

    fn open_branch(&self, url: &str) -> Result<MockBranch, VcsError> {
        self.record(MockOperation::Open {
            url: url.to_string(),
        });
        let inner = lock(&self.inner);
        for fail in &inner.fail_on {
            if let FailOn::Open { url: failing, error } = fail {
                if failing == url {
                    return Err(error.clone());
                }
            }
        }
        match inner.locations.get(url) {
            Some(MockLocation::Branch(_)) => Ok(self.branch(url)),
            _ => Err(VcsError::NotBranch {
                url: url.to_string(),
            }),
        }
    }

    fn create_branch_like(&self, url: &str, like: &MockBranch) -> Result<MockBranch, VcsError> {
        self.record(MockOperation::Create {
            url: url.to_string(),
        });
        let format = like.format()?;
        let mut inner = lock(&self.inner);
        if inner.locations.contains_key(url) {
            return Err(VcsError::Internal {
                message: format!("location already exists: {}", url),
            });
        }
        inner.locations.insert(
            url.to_string(),
            MockLocation::Branch(MockBranchState::empty().with_format(format)),
        );
        Ok(self.branch(url))
    }

    fn delete_tree(&self, url: &str) -> Result<(), VcsError> {
        self.record(MockOperation::Delete {
            url: url.to_string(),
        });
        lock(&self.inner).locations.remove(url);
        Ok(())
    }

    fn supports_raw_copy(&self, _source: &str, _destination: &str) -> bool {
        lock(&self.inner).raw_copy
    }

    fn list_files(&self, url: &str) -> Result<TreeListing, VcsError> {
        self.record(MockOperation::ListFiles {
            url: url.to_string(),
        });
        let mut inner = lock(&self.inner);
        let Some(script) = inner.listings.get_mut(url) else {
            return Ok(TreeListing::default());
        };
        let listing = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(listing.unwrap_or_default())
    }

    fn copy_tree(&self, source: &str, destination: &str) -> Result<(), VcsError> {
        self.record(MockOperation::CopyTree {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        let mut inner = lock(&self.inner);
        let location = inner
            .locations
            .get(source)
            .cloned()
            .ok_or_else(|| VcsError::NotBranch {
                url: source.to_string(),
            })?;
        inner.locations.insert(destination.to_string(), location);
        Ok(())
    }

    fn set_stacked_on_url(&self, branch: &MockBranch, url: &str) -> Result<(), VcsError> {
        self.record(MockOperation::SetStackedOn {
            url: branch.url.clone(),
            stacked_on: url.to_string(),
        });
        let resolved = locator::join(&branch.url, url).map_err(|e| VcsError::Internal {
            message: e.to_string(),
        })?;
        let mut inner = lock(&self.inner);
        for fail in &inner.fail_on {
            if let FailOn::SetStackedOn(error) = fail {
                return Err(error.clone());
            }
        }
        let target_format = match inner.locations.get(&resolved) {
            Some(MockLocation::Branch(target)) => target.format.clone(),
            _ => return Err(VcsError::NotBranch { url: resolved }),
        };
        match inner.locations.get_mut(&branch.url) {
            Some(MockLocation::Branch(state)) => {
                if state.unstackable {
                    return Err(VcsError::UnstackableFormat {
                        message: format!("{} cannot be stacked", branch.url),
                    });
                }
                if state.format != target_format {
                    return Err(VcsError::IncompatibleRepositories {
                        message: format!("{} and {} differ in format", branch.url, resolved),
                    });
                }
                state.stacked_on = Some(url.to_string());
                Ok(())
            }
            _ => Err(VcsError::NotBranch {
                url: branch.url.clone(),
            }),
        }
    }

    fn break_lock(&self, branch: &MockBranch, ui: &dyn UiCallbacks) -> Result<(), VcsError> {
        let Some(holder) = branch.lock_holder()? else {
            return Ok(());
        };
        self.record(MockOperation::BreakLock {
            url: branch.url.clone(),
            holder: holder.clone(),
        });
        let prompt = format!("Break lock on {} held by {}?", branch.url, holder);
        if !ui.confirm_lock_break(&prompt) {
            return Err(VcsError::LockContention { holder });
        }
        branch.with_state(|s| s.lock_holder = None)
    }

    fn pull(
        &self,
        destination: &MockBranch,
        source: &MockBranch,
        overwrite: bool,
        ui: &dyn UiCallbacks,
    ) -> Result<(), VcsError> {
        self.record(MockOperation::Pull {
            destination: destination.url.clone(),
            source: source.url.clone(),
            overwrite,
        });
        for fail in &lock(&self.inner).fail_on {
            if let FailOn::Pull(error) = fail {
                return Err(error.clone());
            }
        }
        ui.progress(Activity::ProgressBar);
        let tip = source.tip()?;
        ui.progress(Activity::Network);
        destination.with_state(|state| {
            if let Some(holder) = &state.lock_holder {
                return Err(VcsError::LockContention {
                    holder: holder.clone(),
                });
            }
            if !overwrite && !state.tip.is_null() && state.tip != tip {
                return Err(VcsError::Internal {
                    message: "branches have diverged".into(),
                });
            }
            state.tip = tip;
            Ok(())
        })?
    }
}
