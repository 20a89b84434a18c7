//! Collection-level download orchestration.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::CredentialProvider;
use crate::fetch::{FileFetcher, PARTIAL_SUFFIX};
use crate::granule::GranuleDownloader;
use crate::payload::CollectionPayload;
use crate::reconcile::Reconciler;
use crate::scheduler::{ParallelScheduler, ProgressCallback};
use crate::state::{StateStore, LEGACY_ERROR_FILE_NAME};
use crate::stats::{CollectionStats, DownloadStats, MissingStats, RetryStats};
use crate::transport::Transport;

use super::config::DownloaderConfig;
use super::error::{ManagerError, ManagerResult};

/// Downloads, retries and repairs one collection at a time.
///
/// The manager owns the state store for its download directory and shares
/// it with the scheduler's workers. Transport and credentials are injected,
/// so the same manager runs against the network or an in-process mock.
pub struct CollectionDownloadManager {
    config: DownloaderConfig,
    state: Arc<StateStore>,
    scheduler: ParallelScheduler,
    reconciler: Reconciler,
}

impl CollectionDownloadManager {
    /// Create a manager, creating the download directory and loading state.
    pub fn new(
        config: DownloaderConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ManagerResult<Self> {
        if config.max_workers == 0 {
            return Err(ManagerError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }

        fs::create_dir_all(&config.download_dir).map_err(|e| ManagerError::CreateDirFailed {
            path: config.download_dir.clone(),
            source: e,
        })?;

        let state = Arc::new(StateStore::open(config.state_file_path())?);
        let fetcher = FileFetcher::new(transport, Arc::clone(&credentials));
        let downloader = GranuleDownloader::new(fetcher, Arc::clone(&state), &config.download_dir);
        let scheduler =
            ParallelScheduler::new(downloader, credentials).with_max_workers(config.max_workers);
        let reconciler =
            Reconciler::new(&config.download_dir).with_record_path(config.missing_record_path());

        tracing::debug!(
            download_dir = %config.download_dir.display(),
            workers = config.max_workers,
            "Collection download manager ready"
        );

        Ok(Self {
            config,
            state,
            scheduler,
            reconciler,
        })
    }

    /// Report progress of every scheduling run through `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.scheduler.set_progress(Some(progress));
        self
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Download every granule of `payload` that is not yet completed.
    ///
    /// Completed and failed counts are cumulative over the state store, not
    /// just this run.
    pub fn download_collection(&self, payload: &CollectionPayload) -> CollectionStats {
        let start = Instant::now();
        let total = payload.len();
        let pending = payload.select(|name| !self.state.is_completed(name));

        if pending.is_empty() {
            tracing::info!(
                collection = payload.collection(),
                granules = total,
                "All granules already downloaded"
            );
            return CollectionStats {
                collection: payload.collection().to_string(),
                total,
                completed: total,
                failed: 0,
                downloaded_bytes: self.downloaded_bytes(),
                elapsed: std::time::Duration::ZERO,
                error: None,
            };
        }

        tracing::info!(
            collection = payload.collection(),
            granules = total,
            pending = pending.len(),
            "Downloading collection"
        );
        let run = self.scheduler.download_many(&pending);

        let stats = CollectionStats {
            collection: payload.collection().to_string(),
            total,
            completed: self.state.completed_count(),
            failed: self.state.failed_count(),
            downloaded_bytes: self.downloaded_bytes(),
            elapsed: start.elapsed(),
            error: run.error,
        };
        tracing::info!(
            collection = payload.collection(),
            completed = stats.completed,
            failed = stats.failed,
            size_gb = format!("{:.2}", stats.size_gb()),
            "Collection download finished"
        );
        stats
    }

    /// Re-attempt the payload's granules that are recorded as failed.
    ///
    /// Failures are cleared and persisted before anything is downloaded, so
    /// an interrupted retry leaves the granules pending rather than failed.
    pub fn retry_failed(&self, payload: &CollectionPayload) -> ManagerResult<RetryStats> {
        let start = Instant::now();
        let failed = self.state.failed();
        if failed.is_empty() {
            tracing::info!("No failed granules to retry");
            return Ok(RetryStats::default());
        }

        let selected = payload.select(|name| failed.contains_key(name));
        if selected.is_empty() {
            tracing::info!(
                collection = payload.collection(),
                failed = failed.len(),
                "No failed granules belong to this collection"
            );
            return Ok(RetryStats::default());
        }

        let cleared = self
            .state
            .clear_failures(selected.keys().map(String::as_str))?;
        tracing::info!(
            collection = payload.collection(),
            granules = selected.len(),
            cleared,
            "Retrying failed granules"
        );

        let run = self.scheduler.download_many(&selected);
        Ok(RetryStats {
            retried: selected.len(),
            succeeded: run.succeeded,
            failed: run.failed,
            elapsed: start.elapsed(),
            error: run.error,
        })
    }

    /// Find granules whose files are missing on disk, optionally
    /// re-downloading them.
    ///
    /// A freshly computed result evicts the missing granules from the
    /// completed set; a result read from an existing record does not.
    pub fn check_missing(&self, payload: &CollectionPayload, heal: bool) -> ManagerResult<MissingStats> {
        let reconciliation = self.reconciler.find_missing(payload.granules())?;

        if !reconciliation.from_record && !reconciliation.missing.is_empty() {
            let evicted = self
                .state
                .evict_completed(reconciliation.missing.iter().map(String::as_str))?;
            tracing::info!(evicted, "Evicted missing granules from completed set");
        }

        let mut stats = MissingStats {
            total: payload.len(),
            missing: reconciliation.missing.len(),
            from_record: reconciliation.from_record,
            ..MissingStats::default()
        };

        if heal && !reconciliation.missing.is_empty() {
            let missing: BTreeSet<&str> = reconciliation.missing.iter().map(String::as_str).collect();
            // A reused record may name granules healed since it was written.
            let targets =
                payload.select(|name| missing.contains(name) && !self.state.is_completed(name));
            tracing::info!(granules = targets.len(), "Re-downloading missing granules");

            let run = self.scheduler.download_many(&targets);
            stats.downloaded = run.succeeded;
            stats.failed = run.failed;
            stats.error = run.error;
        }

        Ok(stats)
    }

    /// State and disk usage of the download directory.
    pub fn download_stats(&self) -> DownloadStats {
        let summary = self.state.summary();
        DownloadStats {
            completed: summary.completed,
            failed: summary.failed,
            pending: summary.pending,
            downloaded_bytes: self.downloaded_bytes(),
        }
    }

    /// Total size of downloaded files under the download directory,
    /// excluding the manager's own bookkeeping files.
    pub fn downloaded_bytes(&self) -> u64 {
        let root = &self.config.download_dir;
        let Some(root_str) = root.to_str() else {
            tracing::warn!(path = %root.display(), "Download directory is not valid UTF-8, size unknown");
            return 0;
        };
        let pattern = format!("{}/**/*", glob::Pattern::escape(root_str));

        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Invalid size scan pattern");
                return 0;
            }
        };

        let internal = self.internal_files();
        entries
            .filter_map(Result::ok)
            .filter(|path| !is_internal(path, &internal))
            .filter_map(|path| fs::metadata(&path).ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    /// Bookkeeping files that live alongside the downloads.
    fn internal_files(&self) -> Vec<PathBuf> {
        let state = self.config.state_file_path();
        let record = self.config.missing_record_path();
        vec![
            state.with_extension("json.tmp"),
            state.with_file_name(LEGACY_ERROR_FILE_NAME),
            state,
            record.with_extension("json.tmp"),
            record,
        ]
    }
}

fn is_internal(path: &Path, internal: &[PathBuf]) -> bool {
    let partial = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));
    if partial {
        return true;
    }
    let path = without_cur_dir(path);
    internal.iter().any(|p| without_cur_dir(p) == path)
}

/// `path` with every `.` component dropped, so `./a/b` and `a/b` compare
/// equal. glob strips a leading `./` from the paths it yields.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
