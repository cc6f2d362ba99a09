//! cli
//!
//! The `puller-worker` binary.
//!
//! # Responsibilities
//!
//! - Parse the job from the command line
//! - Set up logging on stderr; stdout belongs to the worker protocol
//! - Load configuration
//! - Run one [`PullerWorker`] against the git engine
//!
//! # Exit status
//!
//! Zero whenever an outcome was reported, success or failure. Non-zero only
//! for conditions that stop the worker from reporting at all: bad
//! arguments, bad configuration, invariant violations, a closed stdout.

pub mod args;

pub use args::Cli;

use std::io;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::config::Config;
use crate::core::job::MirrorJob;
use crate::core::types::{lock_id_for_branch, UniqueName};
use crate::git::GitEngine;
use crate::mirror::{MirrorOutcome, PullerWorker};
use crate::protocol::WorkerProtocol;
use crate::report::OopsDirectory;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "PULLER_LOG";

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // A subscriber may already be installed when running under a test harness.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init();
}

/// Run the worker.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("cannot load configuration")?;
    if let Some(path) = config.loaded_from() {
        tracing::debug!(path = %path.display(), "configuration loaded");
    }

    let unique_name = UniqueName::new(cli.unique_name.clone())?;
    let job = MirrorJob::new(
        cli.source.clone(),
        cli.destination.clone(),
        cli.branch_id,
        unique_name,
        cli.kind,
        cli.stacked_on(),
    );

    let engine = GitEngine::new(lock_id_for_branch(job.branch_id));
    let protocol = WorkerProtocol::new(io::stdout().lock());
    let reporter = OopsDirectory::from_config(&config);

    let worker = PullerWorker::new(job, &config, engine, &protocol, &reporter)?;
    match worker.mirror()? {
        MirrorOutcome::Success { .. } => {}
        MirrorOutcome::Failure { oops_id, .. } => {
            tracing::debug!(%oops_id, root = %reporter.root().display(), "failure reported");
        }
    }
    Ok(())
}
