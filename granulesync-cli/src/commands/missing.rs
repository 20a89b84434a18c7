//! `check-missing` command.

use std::path::Path;

use console::style;

use super::common::{load_payload, print_row, progress_bar, Context};
use super::download::failed_style;
use super::Outcome;
use crate::error::CliError;

pub fn run(context: &Context, payload_path: &Path, heal: bool) -> Result<Outcome, CliError> {
    let payload = load_payload(payload_path)?;
    let bar = progress_bar();
    let manager = context.manager_with_progress(&bar)?;

    let stats = manager.check_missing(&payload, heal)?;
    bar.finish_and_clear();

    if let Some(error) = stats.error {
        return Err(CliError::Aborted(error));
    }

    println!("{}", style("Missing-file check").bold());
    print_row("Granules", stats.total);
    print_row("Missing", stats.missing);
    if stats.from_record {
        println!(
            "  {} from {} (delete it to rescan)",
            style("Result read").dim(),
            manager.reconciler().record_path().display()
        );
    }

    if !heal {
        if stats.missing > 0 {
            println!(
                "\nRun with {} to re-download them.",
                style("--heal").cyan()
            );
        }
        return Ok(Outcome::from_failures(stats.missing));
    }

    print_row("Downloaded", style(stats.downloaded).green());
    print_row("Failed", failed_style(stats.failed));
    Ok(Outcome::from_failures(stats.failed))
}
