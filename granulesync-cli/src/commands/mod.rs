//! CLI command implementations.

mod common;
mod download;
mod missing;
mod stats;

use std::process::ExitCode;

use crate::cli::{Cli, Command};
use crate::error::CliError;

use common::Context;

/// How a successful command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything requested is done.
    Complete,
    /// The command ran but some granules are still failed or missing.
    Incomplete,
}

impl Outcome {
    pub fn from_failures(failed: usize) -> Self {
        if failed == 0 {
            Self::Complete
        } else {
            Self::Incomplete
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Complete => ExitCode::SUCCESS,
            Self::Incomplete => ExitCode::from(2),
        }
    }
}

/// Run the parsed command line.
pub fn run(cli: Cli) -> Result<Outcome, CliError> {
    let context = Context::from_cli(&cli)?;
    let _log_guard = context.init_logging(cli.verbose)?;
    tracing::debug!(
        download_dir = %context.downloader.download_dir.display(),
        workers = context.downloader.max_workers,
        netrc = ?context.netrc,
        "Resolved settings"
    );

    match cli.command {
        Command::Download(args) => download::run_download(&context, &args.payload),
        Command::Retry(args) => download::run_retry(&context, &args.payload),
        Command::CheckMissing { payload, heal } => missing::run(&context, &payload.payload, heal),
        Command::Stats => stats::run(&context),
    }
}
