//! `download` and `retry` commands.

use std::path::Path;

use console::style;
use granulesync::stats::format_bytes;

use super::common::{load_payload, print_row, progress_bar, Context};
use super::Outcome;
use crate::error::CliError;

/// Download every granule of the payload that is not yet complete.
pub fn run_download(context: &Context, payload_path: &Path) -> Result<Outcome, CliError> {
    let payload = load_payload(payload_path)?;
    let bar = progress_bar();
    let manager = context.manager_with_progress(&bar)?;

    let stats = manager.download_collection(&payload);
    bar.finish_and_clear();

    if let Some(error) = stats.error {
        return Err(CliError::Aborted(error));
    }

    println!("{}", style("Download finished").green().bold());
    print_row("Granules", stats.total);
    print_row("Completed", style(stats.completed).green());
    print_row("Failed", failed_style(stats.failed));
    print_row("On disk", format_bytes(stats.downloaded_bytes));
    print_row("Elapsed", format!("{:.1}s", stats.elapsed.as_secs_f64()));
    if stats.failed > 0 {
        println!(
            "\nRun {} to re-attempt failed granules.",
            style("granulesync retry --payload <FILE>").cyan()
        );
    }
    Ok(Outcome::from_failures(stats.failed))
}

/// Re-attempt granules recorded as failed.
pub fn run_retry(context: &Context, payload_path: &Path) -> Result<Outcome, CliError> {
    let payload = load_payload(payload_path)?;
    let bar = progress_bar();
    let manager = context.manager_with_progress(&bar)?;

    let stats = manager.retry_failed(&payload)?;
    bar.finish_and_clear();

    if let Some(error) = stats.error {
        return Err(CliError::Aborted(error));
    }
    if stats.retried == 0 {
        println!("No failed granules to retry.");
        return Ok(Outcome::Complete);
    }

    println!("{}", style("Retry finished").green().bold());
    print_row("Retried", stats.retried);
    print_row("Succeeded", style(stats.succeeded).green());
    print_row("Failed", failed_style(stats.failed));
    print_row("Elapsed", format!("{:.1}s", stats.elapsed.as_secs_f64()));
    Ok(Outcome::from_failures(stats.failed))
}

pub(super) fn failed_style(failed: usize) -> console::StyledObject<usize> {
    if failed == 0 {
        style(failed).dim()
    } else {
        style(failed).red().bold()
    }
}
