//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! The job is given positionally, in the order the scheduler spawns
//! workers with:
//!
//! ```text
//! puller-worker <source> <destination> <branch-id> <unique-name> <kind> [<default-stacked-on>]
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::core::types::{BranchId, BranchKind};

/// Mirror one branch and report the outcome on stdout.
#[derive(Parser, Debug)]
#[command(name = "puller-worker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Location to pull from
    pub source: String,

    /// Location of the mirror
    pub destination: String,

    /// Database id of the branch
    pub branch_id: BranchId,

    /// Unique name of the branch, e.g. ~user/project/branch
    pub unique_name: String,

    /// Branch kind: mirrored or imported
    pub kind: BranchKind,

    /// Default stacked-on location for the project; empty for none
    #[arg(default_value = "")]
    pub default_stacked_on: String,

    /// Configuration file to use instead of the default locations
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// The default stacked-on location, if one was given.
    pub fn stacked_on(&self) -> Option<String> {
        Some(self.default_stacked_on.clone()).filter(|s| !s.is_empty())
    }
}
