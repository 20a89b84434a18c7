//! Configuration for the collection download manager.

use std::path::PathBuf;
use std::time::Duration;

use crate::reconcile::MISSING_RECORD_FILE_NAME;
use crate::scheduler::DEFAULT_MAX_WORKERS;
use crate::state::STATE_FILE_NAME;
use crate::transport::{RetryPolicy, DEFAULT_TIMEOUT_SECS};

/// Configuration for the collection download manager.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    /// Directory granules are downloaded into, one subdirectory per granule.
    pub download_dir: PathBuf,

    /// Location of the state document.
    ///
    /// Defaults to `download_state.json` inside the download directory.
    pub state_file: Option<PathBuf>,

    /// Location of the missing-granule record.
    ///
    /// Defaults to `missing_granules.json` inside the download directory.
    pub missing_record: Option<PathBuf>,

    /// Number of granules downloaded concurrently.
    pub max_workers: usize,

    /// Per-request HTTP timeout.
    pub timeout: Duration,

    /// Retry behaviour for transient HTTP failures.
    pub retry: RetryPolicy,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            state_file: None,
            missing_record: None,
            max_workers: DEFAULT_MAX_WORKERS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl DownloaderConfig {
    /// Create a new configuration with the given download directory.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Default::default()
        }
    }

    /// Set the state document location.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Set the missing-granule record location.
    pub fn with_missing_record(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing_record = Some(path.into());
        self
    }

    /// Set the worker count.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolved state document path.
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.download_dir.join(STATE_FILE_NAME))
    }

    /// Resolved missing-granule record path.
    pub fn missing_record_path(&self) -> PathBuf {
        self.missing_record
            .clone()
            .unwrap_or_else(|| self.download_dir.join(MISSING_RECORD_FILE_NAME))
    }
}
