//! Per-granule downloading.
//!
//! A granule is complete only when every one of its URLs has been fetched.
//! [`GranuleDownloader`] fetches a granule's URLs in order into
//! `<download_dir>/<granule>/`, stops at the first failure and records the
//! outcome in the [`StateStore`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::fetch::{FetchError, FileFetcher};
use crate::state::StateStore;

/// Errors from downloading one granule.
#[derive(Debug, Error)]
pub enum GranuleError {
    /// The granule has no URLs.
    #[error("granule has no URLs")]
    NoUrls,

    /// The granule directory could not be created.
    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// One of the granule's files failed; later URLs were not attempted.
    #[error("{source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
}

/// Summary of a granule download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GranuleReport {
    /// Files present after the download (fetched or already on disk).
    pub files: usize,
    /// Total size of those files.
    pub bytes: u64,
    /// Wall time spent on the granule.
    pub elapsed: Duration,
    /// The granule was already completed; nothing was done.
    pub skipped: bool,
}

/// Downloads whole granules and records their status.
pub struct GranuleDownloader {
    fetcher: FileFetcher,
    state: Arc<StateStore>,
    download_dir: PathBuf,
}

impl GranuleDownloader {
    pub fn new(fetcher: FileFetcher, state: Arc<StateStore>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            state,
            download_dir: download_dir.into(),
        }
    }

    /// Root directory granules are downloaded into.
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// The state store outcomes are recorded in.
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Directory holding a granule's files.
    pub fn granule_dir(&self, name: &str) -> PathBuf {
        self.download_dir.join(name)
    }

    /// Download every URL of granule `name`.
    ///
    /// Already-completed granules return immediately with `skipped` set.
    /// On failure the granule is recorded as failed with the error text;
    /// files fetched before the failing URL stay on disk.
    pub fn download_granule(&self, name: &str, urls: &[String]) -> Result<GranuleReport, GranuleError> {
        if self.state.is_completed(name) {
            tracing::debug!(granule = name, "Granule already completed, skipping");
            return Ok(GranuleReport {
                skipped: true,
                ..GranuleReport::default()
            });
        }

        match self.fetch_all(name, urls) {
            Ok(report) => {
                if let Err(e) = self.state.mark_completed(name) {
                    tracing::warn!(granule = name, error = %e, "Failed to persist completed granule");
                }
                tracing::info!(
                    granule = name,
                    files = report.files,
                    size_mb = format!("{:.2}", report.bytes as f64 / 1024.0 / 1024.0),
                    elapsed_secs = format!("{:.1}", report.elapsed.as_secs_f64()),
                    "Granule downloaded"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(persist) = self.state.mark_failed(name, e.to_string()) {
                    tracing::warn!(granule = name, error = %persist, "Failed to persist granule failure");
                }
                tracing::error!(granule = name, error = %e, "Granule failed");
                Err(e)
            }
        }
    }

    fn fetch_all(&self, name: &str, urls: &[String]) -> Result<GranuleReport, GranuleError> {
        if urls.is_empty() {
            return Err(GranuleError::NoUrls);
        }

        let dir = self.granule_dir(name);
        fs::create_dir_all(&dir).map_err(|e| GranuleError::CreateDir {
            path: dir.clone(),
            source: e,
        })?;

        let start = Instant::now();
        let mut report = GranuleReport::default();
        for url in urls {
            let fetched = self.fetcher.fetch(url, &dir).map_err(|e| GranuleError::Fetch {
                url: url.clone(),
                source: e,
            })?;
            report.files += 1;
            report.bytes += fetched.bytes;
        }
        report.elapsed = start.elapsed();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::MockCredentials;
    use crate::state::{GranuleStatus, STATE_FILE_NAME};
    use crate::transport::tests::{MockResponse, MockTransport};

    struct Fixture {
        _temp: tempfile::TempDir,
        transport: Arc<MockTransport>,
        downloader: GranuleDownloader,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let transport = Arc::new(transport);
        let state = Arc::new(StateStore::open(temp.path().join(STATE_FILE_NAME)).unwrap());
        let fetcher = FileFetcher::new(transport.clone(), Arc::new(MockCredentials::allowing()));
        let downloader = GranuleDownloader::new(fetcher, state, temp.path());
        Fixture {
            _temp: temp,
            transport,
            downloader,
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_granule_success_marks_completed() {
        let f = fixture(MockTransport::serving(MockResponse::Body(vec![0u8; 100])));

        let report = f
            .downloader
            .download_granule("g1", &urls(&["https://h/a.h5", "https://h/b.h5"]))
            .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.bytes, 200);
        assert!(!report.skipped);
        assert!(f.downloader.state().is_completed("g1"));
        assert!(f.downloader.granule_dir("g1").join("b.h5").exists());
    }

    #[test]
    fn test_completed_granule_is_skipped_without_requests() {
        let f = fixture(MockTransport::serving(MockResponse::Body(vec![1])));
        f.downloader.state().mark_completed("g1").unwrap();

        let report = f
            .downloader
            .download_granule("g1", &urls(&["https://h/a.h5"]))
            .unwrap();

        assert!(report.skipped);
        assert_eq!(f.transport.request_count(), 0);
    }

    #[test]
    fn test_partial_failure_short_circuits() {
        let f = fixture(
            MockTransport::serving(MockResponse::Body(vec![5u8; 10]))
                .with("https://h/b.h5", MockResponse::Status(404)),
        );

        let err = f
            .downloader
            .download_granule(
                "g1",
                &urls(&["https://h/a.h5", "https://h/b.h5", "https://h/c.h5"]),
            )
            .unwrap_err();

        assert!(matches!(err, GranuleError::Fetch { ref url, .. } if url == "https://h/b.h5"));
        assert!(!f.transport.requested("https://h/c.h5"));
        assert!(f.downloader.granule_dir("g1").join("a.h5").exists());
        assert!(!f.downloader.granule_dir("g1").join("b.h5").exists());

        let reason = f.downloader.state().failed().remove("g1").unwrap();
        assert!(reason.contains("HTTP 404"));
        assert!(!f.downloader.state().is_completed("g1"));
    }

    #[test]
    fn test_empty_url_list_is_recorded_as_failure() {
        let f = fixture(MockTransport::serving(MockResponse::Body(vec![1])));

        let err = f.downloader.download_granule("g1", &[]).unwrap_err();

        assert!(matches!(err, GranuleError::NoUrls));
        assert_eq!(
            f.downloader.state().status("g1"),
            Some(GranuleStatus::Failed {
                reason: "granule has no URLs".to_string()
            })
        );
    }

    #[test]
    fn test_empty_body_fails_granule() {
        let f = fixture(
            MockTransport::serving(MockResponse::Body(vec![3u8; 10]))
                .with("https://h/b.h5", MockResponse::Body(Vec::new())),
        );

        let result = f
            .downloader
            .download_granule("g1", &urls(&["https://h/a.h5", "https://h/b.h5"]));

        assert!(result.is_err());
        assert!(!f.downloader.state().is_completed("g1"));
        let reason = f.downloader.state().failed().remove("g1").unwrap();
        assert!(reason.contains("empty response body"));
        assert!(!f.downloader.granule_dir("g1").join("b.h5").exists());
    }

    #[test]
    fn test_success_after_failure_clears_failure() {
        let f = fixture(MockTransport::serving(MockResponse::Body(vec![1; 8])));
        f.downloader.state().mark_failed("g1", "earlier").unwrap();

        f.downloader
            .download_granule("g1", &urls(&["https://h/a.h5"]))
            .unwrap();

        assert!(f.downloader.state().is_completed("g1"));
        assert_eq!(f.downloader.state().failed_count(), 0);
    }

    #[test]
    fn test_existing_files_count_towards_report() {
        let f = fixture(MockTransport::serving(MockResponse::Body(vec![1; 8])));
        let dir = f.downloader.granule_dir("g1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.h5"), b"abc").unwrap();

        let report = f
            .downloader
            .download_granule("g1", &urls(&["https://h/a.h5", "https://h/b.h5"]))
            .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.bytes, 11);
        assert_eq!(f.transport.request_count(), 1);
    }
}
