//! Parallel granule scheduling.
//!
//! [`ParallelScheduler`] runs a [`GranuleDownloader`] over many granules on a
//! fixed pool of scoped worker threads. Workers pull jobs from a shared
//! channel and send one [`TaskOutcome`] per granule back to the calling
//! thread, which aggregates them into [`RunStats`]. A panic inside a task is
//! caught at the task boundary and counted as a failure, so the pool always
//! produces exactly one outcome per granule.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::auth::{ensure_authenticated, CredentialProvider};
use crate::granule::{GranuleDownloader, GranuleReport};
use crate::payload::GranuleMap;
use crate::stats::serialize_secs;

/// Default number of worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Reason recorded for granules that could not run because login failed.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

/// Result of one granule task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The granule is complete (downloaded now or earlier).
    Succeeded(GranuleReport),
    /// The granule failed with this error.
    Failed(String),
    /// The task panicked with this message.
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Progress snapshot passed to the progress callback after every outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Callback invoked on the scheduling thread after every granule.
pub type ProgressCallback = Arc<dyn Fn(&RunProgress) + Send + Sync>;

/// Aggregate result of a scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Set when the whole run was aborted (authentication failure).
    pub error: Option<String>,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded, {} failed in {:.1}s",
            self.succeeded,
            self.total,
            self.failed,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Runs granule downloads on a bounded worker pool.
pub struct ParallelScheduler {
    downloader: GranuleDownloader,
    credentials: Arc<dyn CredentialProvider>,
    max_workers: usize,
    progress: Option<ProgressCallback>,
}

impl ParallelScheduler {
    pub fn new(downloader: GranuleDownloader, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            downloader,
            credentials,
            max_workers: DEFAULT_MAX_WORKERS,
            progress: None,
        }
    }

    /// Set the pool size (at least one worker is always used).
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Set a callback invoked after every processed granule.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Replace the progress callback on an existing scheduler.
    pub fn set_progress(&mut self, progress: Option<ProgressCallback>) {
        self.progress = progress;
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn downloader(&self) -> &GranuleDownloader {
        &self.downloader
    }

    /// Download all `granules` concurrently.
    ///
    /// Authentication is checked once before any work is scheduled; if it
    /// fails every granule not already completed is recorded as failed and
    /// nothing is downloaded.
    pub fn download_many(&self, granules: &GranuleMap) -> RunStats {
        let total = granules.len();
        if total == 0 {
            return RunStats::default();
        }
        let start = Instant::now();

        if !ensure_authenticated(self.credentials.as_ref()) {
            tracing::error!(granules = total, "Authentication failed, nothing downloaded");
            let names = granules.keys().map(String::as_str);
            if let Err(e) = self.downloader.state().mark_all_failed(names, AUTHENTICATION_FAILED) {
                tracing::warn!(error = %e, "Failed to persist authentication failures");
            }
            return RunStats {
                total,
                succeeded: 0,
                failed: total,
                elapsed: start.elapsed(),
                error: Some(AUTHENTICATION_FAILED.to_string()),
            };
        }

        let workers = self.max_workers.min(total);
        tracing::info!(granules = total, workers, "Starting parallel download");

        let (job_tx, job_rx) = mpsc::channel::<(&str, &[String])>();
        for (name, urls) in granules {
            // The receiver is alive until the end of this function.
            let _ = job_tx.send((name.as_str(), urls.as_slice()));
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel::<(&str, TaskOutcome)>();

        let mut stats = RunStats {
            total,
            ..RunStats::default()
        };

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                let downloader = &self.downloader;
                scope.spawn(move || loop {
                    let job = job_rx.lock().recv();
                    let Ok((name, urls)) = job else {
                        break;
                    };
                    let outcome = run_task(downloader, name, urls);
                    if result_tx.send((name, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            for (name, outcome) in result_rx {
                self.record(name, outcome, &mut stats);
            }
        });

        stats.elapsed = start.elapsed();
        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            elapsed_secs = format!("{:.1}", stats.elapsed.as_secs_f64()),
            "Parallel download finished"
        );
        stats
    }

    /// Fold one outcome into `stats` and report progress.
    fn record(&self, name: &str, outcome: TaskOutcome, stats: &mut RunStats) {
        match outcome {
            TaskOutcome::Succeeded(_) => stats.succeeded += 1,
            TaskOutcome::Failed(_) => stats.failed += 1,
            TaskOutcome::Panicked(message) => {
                stats.failed += 1;
                tracing::error!(granule = name, panic = %message, "Granule task panicked");
                let reason = format!("task panicked: {}", message);
                if let Err(e) = self.downloader.state().mark_failed(name, reason) {
                    tracing::warn!(granule = name, error = %e, "Failed to persist panicked granule");
                }
            }
        }

        let progress = RunProgress {
            processed: stats.succeeded + stats.failed,
            total: stats.total,
            succeeded: stats.succeeded,
            failed: stats.failed,
        };
        tracing::info!(
            processed = progress.processed,
            total = progress.total,
            succeeded = progress.succeeded,
            failed = progress.failed,
            "Progress"
        );
        if let Some(callback) = &self.progress {
            callback(&progress);
        }
    }
}

/// Run one granule, converting a panic into an outcome.
fn run_task(downloader: &GranuleDownloader, name: &str, urls: &[String]) -> TaskOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| downloader.download_granule(name, urls)));
    match result {
        Ok(Ok(report)) => TaskOutcome::Succeeded(report),
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
