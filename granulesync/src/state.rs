//! Durable download state.
//!
//! The state store records, per granule, whether it is pending, completed or
//! failed (with the last error message). It is a single JSON document keyed
//! by granule name, so a granule can never be both completed and failed:
//!
//! ```text
//! {
//!   "version": 1,
//!   "granules": {
//!     "g1": { "status": "completed", "updated_at": 1760000000 },
//!     "g2": { "status": "failed", "reason": "HTTP 503 from ...", "updated_at": 1760000042 }
//!   }
//! }
//! ```
//!
//! Every mutation rewrites the whole document (temporary file + rename) while
//! holding the store's lock, so concurrent workers serialize on the complete
//! read-modify-persist sequence.
//!
//! Older download directories kept a plain list of completed granules in the
//! state file and a separate `download_errors.json`; both are read on open
//! and folded into the document on the next save.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default state document name inside the download directory.
pub const STATE_FILE_NAME: &str = "download_state.json";

/// Error map written by older versions next to the state file.
pub const LEGACY_ERROR_FILE_NAME: &str = "download_errors.json";

const STATE_VERSION: u32 = 1;

/// Errors from loading or persisting state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but could not be read.
    #[error("failed to read state file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file could not be parsed.
    #[error("state file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The state file could not be written.
    #[error("failed to write state file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Status of a single granule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GranuleStatus {
    /// Known but not (or no longer) downloaded.
    Pending,
    /// Every file of the granule was downloaded.
    Completed,
    /// The last attempt failed.
    Failed { reason: String },
}

/// A granule's persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranuleRecord {
    #[serde(flatten)]
    pub status: GranuleStatus,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

/// Counts of granules per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    granules: BTreeMap<String, GranuleRecord>,
}

impl StateDocument {
    fn set(&mut self, name: &str, status: GranuleStatus) {
        let record = GranuleRecord {
            status,
            updated_at: now_secs(),
        };
        self.granules.insert(name.to_string(), record);
    }

    fn status_of(&self, name: &str) -> Option<&GranuleStatus> {
        self.granules.get(name).map(|r| &r.status)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PersistedState {
    Document(StateDocument),
    LegacyCompleted(Vec<String>),
}

/// Thread-safe, file-backed download state.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl StateStore {
    /// Open the state at `path`, creating an empty state if the file is absent.
    ///
    /// A legacy `download_errors.json` next to `path` is merged in when the
    /// state file is absent or still in the legacy list format.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let legacy = path.with_file_name(LEGACY_ERROR_FILE_NAME);
        Self::open_with_legacy(path, Some(&legacy))
    }

    /// Open the state at `path` with an explicit legacy error-map location.
    pub fn open_with_legacy(
        path: impl Into<PathBuf>,
        legacy_errors: Option<&Path>,
    ) -> Result<Self, StateError> {
        let path = path.into();

        let document = match read_json::<PersistedState>(&path)? {
            Some(PersistedState::Document(document)) => document,
            Some(PersistedState::LegacyCompleted(completed)) => {
                let document = migrate_legacy(completed, legacy_errors)?;
                tracing::info!(
                    path = %path.display(),
                    granules = document.granules.len(),
                    "Migrated legacy download state"
                );
                document
            }
            None => migrate_legacy(Vec::new(), legacy_errors)?,
        };

        let store = Self {
            path,
            document: Mutex::new(document),
        };
        let summary = store.summary();
        tracing::info!(
            path = %store.path.display(),
            completed = summary.completed,
            failed = summary.failed,
            "Loaded download state"
        );
        Ok(store)
    }

    /// Location of the state document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status of a granule, if it has ever been recorded.
    pub fn status(&self, name: &str) -> Option<GranuleStatus> {
        self.document.lock().status_of(name).cloned()
    }

    /// Whether the granule is recorded as completed.
    pub fn is_completed(&self, name: &str) -> bool {
        matches!(
            self.document.lock().status_of(name),
            Some(GranuleStatus::Completed)
        )
    }

    /// Whether the granule is recorded as failed.
    pub fn is_failed(&self, name: &str) -> bool {
        matches!(
            self.document.lock().status_of(name),
            Some(GranuleStatus::Failed { .. })
        )
    }

    /// Names of all completed granules.
    pub fn completed(&self) -> BTreeSet<String> {
        self.document
            .lock()
            .granules
            .iter()
            .filter(|(_, r)| r.status == GranuleStatus::Completed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Failed granules with their last error message.
    pub fn failed(&self) -> BTreeMap<String, String> {
        self.document
            .lock()
            .granules
            .iter()
            .filter_map(|(name, r)| match &r.status {
                GranuleStatus::Failed { reason } => Some((name.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of completed granules.
    pub fn completed_count(&self) -> usize {
        self.summary().completed
    }

    /// Number of failed granules.
    pub fn failed_count(&self) -> usize {
        self.summary().failed
    }

    /// Counts per status.
    pub fn summary(&self) -> StateSummary {
        let document = self.document.lock();
        let mut summary = StateSummary::default();
        for record in document.granules.values() {
            match record.status {
                GranuleStatus::Pending => summary.pending += 1,
                GranuleStatus::Completed => summary.completed += 1,
                GranuleStatus::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    /// Record a granule as completed, replacing any earlier failure.
    pub fn mark_completed(&self, name: &str) -> Result<(), StateError> {
        self.update(|document| document.set(name, GranuleStatus::Completed))
    }

    /// Record a granule as failed.
    pub fn mark_failed(&self, name: &str, reason: impl Into<String>) -> Result<(), StateError> {
        let reason = reason.into();
        self.update(|document| document.set(name, GranuleStatus::Failed { reason }))
    }

    /// Record several granules as failed with the same reason, in one save.
    ///
    /// Granules already completed keep their status. Returns how many were
    /// marked.
    pub fn mark_all_failed<'a, I>(&self, names: I, reason: &str) -> Result<usize, StateError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.update(|document| {
            let mut marked = 0;
            for name in names {
                if document.status_of(name) == Some(&GranuleStatus::Completed) {
                    continue;
                }
                document.set(
                    name,
                    GranuleStatus::Failed {
                        reason: reason.to_string(),
                    },
                );
                marked += 1;
            }
            marked
        })
    }

    /// Reset failed granules to pending. Returns how many were cleared.
    pub fn clear_failures<'a, I>(&self, names: I) -> Result<usize, StateError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.transition(names, |status| matches!(status, GranuleStatus::Failed { .. }))
    }

    /// Reset completed granules to pending so they are downloaded again.
    /// Returns how many were evicted.
    pub fn evict_completed<'a, I>(&self, names: I) -> Result<usize, StateError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.transition(names, |status| *status == GranuleStatus::Completed)
    }

    /// Move matching granules to pending, saving only if something changed.
    fn transition<'a, I, F>(&self, names: I, from: F) -> Result<usize, StateError>
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&GranuleStatus) -> bool,
    {
        let mut document = self.document.lock();
        let mut changed = 0;
        for name in names {
            if document.status_of(name).is_some_and(&from) {
                document.set(name, GranuleStatus::Pending);
                changed += 1;
            }
        }
        if changed > 0 {
            self.save(&document)?;
        }
        Ok(changed)
    }

    /// Apply a mutation and persist the whole document under the lock.
    fn update<F, T>(&self, mutate: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut StateDocument) -> T,
    {
        let mut document = self.document.lock();
        let result = mutate(&mut document);
        self.save(&document)?;
        Ok(result)
    }

    fn save(&self, document: &StateDocument) -> Result<(), StateError> {
        let write_err = |source: io::Error| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, document).map_err(|e| write_err(e.into()))?;
        writer.flush().map_err(write_err)?;
        drop(writer);

        std::fs::rename(&temp_path, &self.path).map_err(write_err)?;
        tracing::trace!(
            path = %self.path.display(),
            granules = document.granules.len(),
            "Saved download state"
        );
        Ok(())
    }
}

/// Build a document from a legacy completed list and optional error map.
fn migrate_legacy(
    completed: Vec<String>,
    legacy_errors: Option<&Path>,
) -> Result<StateDocument, StateError> {
    let mut document = StateDocument {
        version: STATE_VERSION,
        granules: BTreeMap::new(),
    };

    if let Some(errors_path) = legacy_errors {
        if let Some(errors) = read_json::<BTreeMap<String, String>>(errors_path)? {
            tracing::info!(
                path = %errors_path.display(),
                failed = errors.len(),
                "Read legacy error map"
            );
            for (name, reason) in errors {
                document.set(&name, GranuleStatus::Failed { reason });
            }
        }
    }

    // Completion wins over a stale error entry.
    for name in completed {
        document.set(&name, GranuleStatus::Completed);
    }
    Ok(document)
}

/// Read and parse a JSON file, `None` if it does not exist.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::open(dir.join(STATE_FILE_NAME)).unwrap()
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        assert_eq!(store.summary(), StateSummary::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_completed_replaces_failure() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        store.mark_failed("g1", "HTTP 503").unwrap();
        assert!(store.is_failed("g1"));
        store.mark_completed("g1").unwrap();

        assert!(store.is_completed("g1"));
        assert!(!store.is_failed("g1"));
        assert!(store.failed().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        {
            let store = store_in(temp.path());
            store.mark_completed("g1").unwrap();
            store.mark_failed("g2", "boom").unwrap();
        }

        let store = store_in(temp.path());
        assert_eq!(store.completed(), BTreeSet::from(["g1".to_string()]));
        assert_eq!(store.failed().get("g2").map(String::as_str), Some("boom"));
    }

    #[test]
    fn test_document_format() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        store.mark_failed("g2", "boom").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["granules"]["g2"]["status"], "failed");
        assert_eq!(raw["granules"]["g2"]["reason"], "boom");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_clear_failures_only_touches_failed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        store.mark_completed("g1").unwrap();
        store.mark_failed("g2", "boom").unwrap();

        let cleared = store.clear_failures(["g1", "g2", "unknown"]).unwrap();

        assert_eq!(cleared, 1);
        assert!(store.is_completed("g1"));
        assert_eq!(store.status("g2"), Some(GranuleStatus::Pending));
        assert_eq!(store_in(temp.path()).failed_count(), 0);
    }

    #[test]
    fn test_evict_completed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        store.mark_completed("g1").unwrap();
        store.mark_failed("g2", "boom").unwrap();

        assert_eq!(store.evict_completed(["g1", "g2"]).unwrap(), 1);
        assert!(!store.is_completed("g1"));
        assert!(store.is_failed("g2"));
    }

    #[test]
    fn test_mark_all_failed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        store
            .mark_all_failed(["a", "b"], "authentication failed")
            .unwrap();

        assert_eq!(store.failed_count(), 2);
    }

    #[test]
    fn test_mark_all_failed_keeps_completed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        store.mark_completed("done").unwrap();

        let marked = store
            .mark_all_failed(["done", "todo"], "authentication failed")
            .unwrap();

        assert_eq!(marked, 1);
        assert!(store.is_completed("done"));
        assert!(store.is_failed("todo"));

        let reopened = store_in(temp.path());
        assert!(reopened.is_completed("done"));
    }

    #[test]
    fn test_migrates_legacy_files() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(STATE_FILE_NAME), r#"["g1", "g3"]"#).unwrap();
        std::fs::write(
            temp.path().join(LEGACY_ERROR_FILE_NAME),
            r#"{"g2": "HTTP 500", "g3": "stale"}"#,
        )
        .unwrap();

        let store = store_in(temp.path());

        assert_eq!(
            store.completed(),
            BTreeSet::from(["g1".to_string(), "g3".to_string()])
        );
        assert_eq!(store.failed().len(), 1);
        assert_eq!(store.failed()["g2"], "HTTP 500");
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(STATE_FILE_NAME), "{ not json").unwrap();

        let result = StateStore::open(temp.path().join(STATE_FILE_NAME));
        assert!(matches!(result, Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn test_concurrent_updates_are_all_persisted() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..10 {
                        store.mark_completed(&format!("g{}-{}", worker, i)).unwrap();
                    }
                });
            }
        });

        assert_eq!(store_in(temp.path()).completed_count(), 80);
    }
}
