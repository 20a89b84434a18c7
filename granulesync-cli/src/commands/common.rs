//! Shared setup for CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use granulesync::auth::NetrcCredentials;
use granulesync::config::{default_log_dir, ConfigFile};
use granulesync::logging::{self, LoggingConfig, WorkerGuard};
use granulesync::scheduler::RunProgress;
use granulesync::transport::ReqwestTransport;
use granulesync::{CollectionDownloadManager, CollectionPayload, DownloaderConfig};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::Cli;
use crate::error::CliError;

/// Console log level when neither `--verbose` nor the config file set one.
const QUIET_LEVEL: &str = "warn";

/// Settings resolved from flags and the config file.
///
/// Flags take precedence over the config file, which takes precedence over
/// built-in defaults.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: ConfigFile,
    pub downloader: DownloaderConfig,
    pub netrc: Option<PathBuf>,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let config = ConfigFile::load(cli.config.as_deref())?;

        let mut downloader = config.to_downloader_config(PathBuf::from("."));
        if let Some(dir) = &cli.download_dir {
            downloader.download_dir = dir.clone();
        }
        if let Some(workers) = cli.max_workers {
            downloader = downloader.with_max_workers(workers);
        }

        Ok(Self {
            netrc: cli.netrc.clone().or_else(|| config.netrc_file.clone()),
            config,
            downloader,
        })
    }

    /// Install logging: stderr plus a log file under the configured directory.
    pub fn init_logging(&self, verbose: bool) -> Result<Option<WorkerGuard>, CliError> {
        let level = if verbose {
            "debug".to_string()
        } else {
            self.config
                .log_level
                .clone()
                .unwrap_or_else(|| QUIET_LEVEL.to_string())
        };

        let mut logging = LoggingConfig::default()
            .with_level(level)
            .with_ansi(console::colors_enabled_stderr());
        if let Some(dir) = self.config.log_dir.clone().or_else(default_log_dir) {
            logging = logging.with_log_dir(dir);
        }
        Ok(logging::init(&logging)?)
    }

    /// Build a manager talking to the network.
    pub fn manager(&self) -> Result<CollectionDownloadManager, CliError> {
        let credentials = Arc::new(NetrcCredentials::for_machine(
            self.netrc.clone(),
            self.config.auth_host(),
        ));
        let transport = ReqwestTransport::with_config(
            self.downloader.timeout,
            self.downloader.retry.clone(),
        )?
        .with_credentials(Arc::clone(&credentials));

        Ok(CollectionDownloadManager::new(
            self.downloader.clone(),
            Arc::new(transport),
            credentials,
        )?)
    }

    /// Build a manager that reports progress on a progress bar.
    pub fn manager_with_progress(&self, bar: &ProgressBar) -> Result<CollectionDownloadManager, CliError> {
        let bar = bar.clone();
        let manager = self.manager()?.with_progress(Arc::new(move |p: &RunProgress| {
            bar.set_length(p.total as u64);
            bar.set_position(p.processed as u64);
            bar.set_message(format!("{} ok, {} failed", p.succeeded, p.failed));
        }));
        Ok(manager)
    }
}

/// Load a payload and print its headline.
pub fn load_payload(path: &Path) -> Result<CollectionPayload, CliError> {
    let payload = CollectionPayload::load(path)?;
    println!(
        "{} {} ({} granules)",
        style("Collection").bold(),
        style(payload.collection()).cyan(),
        payload.len()
    );
    Ok(payload)
}

/// Granule-level progress bar.
pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
    {
        bar.set_style(bar_style.progress_chars("=>-"));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Print a labelled summary line.
pub fn print_row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<12} {}", style(label).dim(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_override_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp.path().join("config.ini");
        std::fs::write(
            &config,
            "[download]\ndirectory = /from/config\nmax_workers = 2\n[auth]\nnetrc_file = /etc/netrc\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "granulesync",
            "--config",
            config.to_str().unwrap(),
            "-w",
            "9",
            "stats",
        ])
        .unwrap();
        let context = Context::from_cli(&cli).unwrap();

        assert_eq!(context.downloader.download_dir, PathBuf::from("/from/config"));
        assert_eq!(context.downloader.max_workers, 9);
        assert_eq!(context.netrc, Some(PathBuf::from("/etc/netrc")));
    }

    #[test]
    fn test_download_dir_flag_wins() {
        let temp = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "granulesync",
            "--config",
            temp.path().join("absent.ini").to_str().unwrap(),
            "--download-dir",
            "/data/x",
            "stats",
        ])
        .unwrap();

        let context = Context::from_cli(&cli).unwrap();
        assert_eq!(context.downloader.download_dir, PathBuf::from("/data/x"));
        assert_eq!(context.downloader.max_workers, 4);
    }
}
