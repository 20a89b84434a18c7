//! `stats` command.

use console::style;
use granulesync::stats::format_bytes;

use super::common::{print_row, Context};
use super::download::failed_style;
use super::Outcome;
use crate::error::CliError;

pub fn run(context: &Context) -> Result<Outcome, CliError> {
    let manager = context.manager()?;
    let stats = manager.download_stats();

    println!(
        "{} {}",
        style("Download directory").bold(),
        manager.config().download_dir.display()
    );
    print_row("Completed", style(stats.completed).green());
    print_row("Failed", failed_style(stats.failed));
    print_row("Pending", stats.pending);
    print_row("On disk", format_bytes(stats.downloaded_bytes));

    let failed = manager.state().failed();
    if !failed.is_empty() {
        println!("\n{}", style("Failed granules").bold());
        for (name, reason) in failed.iter().take(20) {
            println!("  {} {}", style(name).red(), style(reason).dim());
        }
        if failed.len() > 20 {
            println!("  ... and {} more", failed.len() - 20);
        }
    }
    Ok(Outcome::Complete)
}
