//! granulesync CLI - Command-line interface
//!
//! Thin front-end over the granulesync library: loads a collection payload,
//! builds a download manager from the config file and flags, and prints a
//! summary of each operation.

mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use clap::Parser;
use console::style;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::run(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
