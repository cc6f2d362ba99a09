//! report::oops
//!
//! Error reports as JSON files, one per failure, grouped by day:
//!
//! ```text
//! <root>/2026-10-15/OOPS-PULL3F9A0C12B7D4.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ErrorReport, ErrorReporter};
use crate::core::config::Config;

/// Length of the random part of a report id.
const ID_LENGTH: usize = 12;

#[derive(Serialize)]
struct OopsDocument<'a> {
    id: &'a str,
    time: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a ErrorReport,
}

/// Writes error reports under a directory.
#[derive(Debug, Clone)]
pub struct OopsDirectory {
    root: PathBuf,
    prefix: String,
}

impl OopsDirectory {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.oops_dir(), config.oops_prefix())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn new_id(&self) -> String {
        let random = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        format!("OOPS-{}{}", self.prefix, &random[..ID_LENGTH])
    }

    fn write(&self, id: &str, time: DateTime<Utc>, report: &ErrorReport) -> std::io::Result<PathBuf> {
        let dir = self.root.join(time.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", id));
        let document = OopsDocument { id, time, report };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

impl ErrorReporter for OopsDirectory {
    fn record(&self, report: &ErrorReport) -> String {
        let id = self.new_id();
        match self.write(&id, Utc::now(), report) {
            Ok(path) => tracing::info!(id, path = %path.display(), "error report written"),
            // stderr is then the only place the report survives
            Err(e) => tracing::error!(
                id,
                root = %self.root.display(),
                error = %e,
                report = %serde_json::to_string(report).unwrap_or_else(|_| format!("{:?}", report)),
                "cannot write error report"
            ),
        }
        id
    }
}
