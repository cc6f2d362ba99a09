//! vcs::format
//!
//! Storage format descriptors.
//!
//! A branch's format has three parts: the control directory, the branch
//! (how references are stored) and the repository (how objects are
//! stored). Each part has a descriptor string the engine reports about
//! itself. A handful of legacy formats also have a canonical title which
//! is reported in place of the descriptor.

use std::fmt;

/// One part of a storage format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatMarker {
    descriptor: String,
    legacy_title: Option<&'static str>,
}

impl FormatMarker {
    /// A format known only by its own descriptor.
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            legacy_title: None,
        }
    }

    /// A legacy format with a canonical title.
    pub fn legacy(descriptor: impl Into<String>, title: &'static str) -> Self {
        Self {
            descriptor: descriptor.into(),
            legacy_title: Some(title),
        }
    }

    /// The engine's own descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// String reported to the scheduler: the canonical title for legacy
    /// formats, the descriptor otherwise.
    pub fn report_string(&self) -> &str {
        self.legacy_title.unwrap_or(&self.descriptor)
    }
}

impl fmt::Display for FormatMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.report_string())
    }
}

/// Complete storage format of a branch.
///
/// Two branches have the same format when all three descriptors match;
/// titles do not take part in the comparison.
#[derive(Debug, Clone)]
pub struct BranchFormat {
    /// Control directory format
    pub control: FormatMarker,
    /// Reference storage format
    pub branch: FormatMarker,
    /// Object storage format
    pub repository: FormatMarker,
}

impl BranchFormat {
    /// Report strings for the three parts.
    pub fn report_strings(&self) -> FormatStrings {
        FormatStrings {
            control: self.control.report_string().to_string(),
            branch: self.branch.report_string().to_string(),
            repository: self.repository.report_string().to_string(),
        }
    }
}

impl PartialEq for BranchFormat {
    fn eq(&self, other: &Self) -> bool {
        self.control.descriptor == other.control.descriptor
            && self.branch.descriptor == other.branch.descriptor
            && self.repository.descriptor == other.repository.descriptor
    }
}

impl Eq for BranchFormat {}

/// Format strings as sent in a `branchChanged` event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatStrings {
    pub control: String,
    pub branch: String,
    pub repository: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(control: FormatMarker) -> BranchFormat {
        BranchFormat {
            control,
            branch: FormatMarker::new("files"),
            repository: FormatMarker::new("sha1"),
        }
    }

    #[test]
    fn legacy_title_is_reported() {
        let marker = FormatMarker::legacy("git-v0", "Git format 0");
        assert_eq!(marker.report_string(), "Git format 0");
        assert_eq!(marker.descriptor(), "git-v0");
    }

    #[test]
    fn descriptor_reported_without_title() {
        assert_eq!(FormatMarker::new("git-v1 noop").report_string(), "git-v1 noop");
    }

    #[test]
    fn equality_ignores_titles() {
        let a = format(FormatMarker::legacy("git-v0", "Git format 0"));
        let b = format(FormatMarker::new("git-v0"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_descriptors_differ() {
        let a = format(FormatMarker::new("git-v0"));
        let b = format(FormatMarker::new("git-v1 noop"));
        assert_ne!(a, b);
    }

    #[test]
    fn report_strings_cover_all_parts() {
        let strings = format(FormatMarker::new("git-v0")).report_strings();
        assert_eq!(strings.control, "git-v0");
        assert_eq!(strings.branch, "files");
        assert_eq!(strings.repository, "sha1");
    }
}
