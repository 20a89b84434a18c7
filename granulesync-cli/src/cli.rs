//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resumable, concurrent downloads of granule-based datasets.
#[derive(Debug, Parser)]
#[command(name = "granulesync", version, about)]
pub struct Cli {
    /// Config file (default: ~/.granulesync/config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory granules are downloaded into
    #[arg(short = 'd', long, global = true, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// Number of granules downloaded concurrently
    #[arg(short = 'w', long, global = true, value_name = "N")]
    pub max_workers: Option<usize>,

    /// .netrc file holding the login credentials
    #[arg(long, global = true, value_name = "FILE")]
    pub netrc: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download every granule of a collection that is not yet complete
    Download(PayloadArgs),

    /// Retry the granules recorded as failed
    Retry(PayloadArgs),

    /// Find granules whose files are missing on disk
    CheckMissing {
        #[command(flatten)]
        payload: PayloadArgs,

        /// Re-download the missing granules
        #[arg(long)]
        heal: bool,
    },

    /// Show download state and disk usage
    Stats,
}

#[derive(Debug, Args)]
pub struct PayloadArgs {
    /// Collection payload file (bincode, or JSON with a .json extension)
    #[arg(short, long, value_name = "FILE")]
    pub payload: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_missing() {
        let cli = Cli::try_parse_from([
            "granulesync",
            "check-missing",
            "--payload",
            "gedi.bin",
            "--heal",
            "-w",
            "8",
        ])
        .unwrap();

        assert_eq!(cli.max_workers, Some(8));
        match cli.command {
            Command::CheckMissing { payload, heal } => {
                assert_eq!(payload.payload, PathBuf::from("gedi.bin"));
                assert!(heal);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_download_requires_payload() {
        assert!(Cli::try_parse_from(["granulesync", "download"]).is_err());
    }
}
