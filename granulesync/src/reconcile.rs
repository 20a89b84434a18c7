//! Reconciliation of recorded state against the files on disk.
//!
//! The state store can claim a granule is complete while its files have
//! since been deleted or never fully landed. [`Reconciler`] treats the
//! download directory as ground truth: a granule is missing when its
//! directory is absent or empty, or when any file named by its URLs is
//! absent or zero-sized.
//!
//! The result of a scan is written to `missing_granules.json` and reused by
//! later checks until that file is removed, so repeated checks of a large
//! collection do not rescan the disk.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::payload::{filename_from_url, GranuleMap};

/// Default name of the missing-granule record inside the download directory.
pub const MISSING_RECORD_FILE_NAME: &str = "missing_granules.json";

/// Errors from reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A granule directory exists but could not be inspected.
    #[error("failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The missing record could not be written.
    #[error("failed to write missing record {}: {source}", path.display())]
    WriteRecord {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a granule is considered missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// `<download_dir>/<granule>` does not exist.
    NoDirectory,
    /// The granule directory exists but holds nothing.
    EmptyDirectory,
    /// These expected files are absent or empty.
    MissingFiles(Vec<String>),
}

/// A granule found missing by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingGranule {
    pub name: String,
    pub reason: MissingReason,
}

/// Outcome of [`Reconciler::find_missing`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Names of the missing granules.
    pub missing: Vec<String>,
    /// Whether `missing` was read from an existing record.
    pub from_record: bool,
}

/// Compares expected granule files with the download directory.
#[derive(Debug, Clone)]
pub struct Reconciler {
    download_dir: PathBuf,
    record_path: PathBuf,
}

impl Reconciler {
    /// Reconciler for `download_dir`, keeping its record inside it.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        let download_dir = download_dir.into();
        let record_path = download_dir.join(MISSING_RECORD_FILE_NAME);
        Self {
            download_dir,
            record_path,
        }
    }

    /// Use a different location for the missing record.
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = path.into();
        self
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Missing granules, from the record if one exists, otherwise from a
    /// fresh scan which is then written as the new record.
    pub fn find_missing(&self, granules: &GranuleMap) -> Result<Reconciliation, ReconcileError> {
        if let Some(missing) = self.load_record() {
            tracing::info!(
                path = %self.record_path.display(),
                missing = missing.len(),
                "Using existing missing-granule record"
            );
            return Ok(Reconciliation {
                missing,
                from_record: true,
            });
        }

        let missing: Vec<String> = self.scan(granules)?.into_iter().map(|m| m.name).collect();
        self.save_record(&missing)?;
        Ok(Reconciliation {
            missing,
            from_record: false,
        })
    }

    /// Scan the disk for every granule of `granules`.
    pub fn scan(&self, granules: &GranuleMap) -> Result<Vec<MissingGranule>, ReconcileError> {
        let mut missing = Vec::new();
        for (name, urls) in granules {
            if let Some(reason) = self.check_granule(name, urls)? {
                tracing::debug!(granule = %name, reason = ?reason, "Granule missing on disk");
                missing.push(MissingGranule {
                    name: name.clone(),
                    reason,
                });
            }
        }
        tracing::info!(
            granules = granules.len(),
            missing = missing.len(),
            "Scanned download directory"
        );
        Ok(missing)
    }

    /// Check a single granule, `None` when all its files are present.
    pub fn check_granule(&self, name: &str, urls: &[String]) -> Result<Option<MissingReason>, ReconcileError> {
        let dir = self.download_dir.join(name);
        let scan_err = |source: io::Error| ReconcileError::Scan {
            path: dir.clone(),
            source,
        };

        let mut entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(MissingReason::NoDirectory)),
            Err(e) if !dir.is_dir() && dir.exists() => {
                tracing::debug!(path = %dir.display(), error = %e, "Granule path is not a directory");
                return Ok(Some(MissingReason::NoDirectory));
            }
            Err(e) => return Err(scan_err(e)),
        };
        if entries.next().is_none() {
            return Ok(Some(MissingReason::EmptyDirectory));
        }

        let absent: Vec<String> = urls
            .iter()
            .filter_map(|url| filename_from_url(url))
            .filter(|filename| !is_non_empty_file(&dir.join(filename)))
            .map(str::to_string)
            .collect();

        if absent.is_empty() {
            Ok(None)
        } else {
            Ok(Some(MissingReason::MissingFiles(absent)))
        }
    }

    /// Read the missing record; `None` when absent or unreadable.
    pub fn load_record(&self) -> Option<Vec<String>> {
        let file = match File::open(&self.record_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.record_path.display(), error = %e, "Cannot read missing record, rescanning");
                return None;
            }
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(missing) => Some(missing),
            Err(e) => {
                tracing::warn!(path = %self.record_path.display(), error = %e, "Missing record is corrupt, rescanning");
                None
            }
        }
    }

    /// Write the missing record as a pretty-printed JSON list.
    pub fn save_record(&self, missing: &[String]) -> Result<(), ReconcileError> {
        let write_err = |source: io::Error| ReconcileError::WriteRecord {
            path: self.record_path.clone(),
            source,
        };

        if let Some(parent) = self.record_path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let temp_path = self.record_path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&temp_path).map_err(write_err)?);
        serde_json::to_writer_pretty(&mut writer, missing).map_err(|e| write_err(e.into()))?;
        writer.flush().map_err(write_err)?;
        drop(writer);
        fs::rename(&temp_path, &self.record_path).map_err(write_err)?;

        tracing::info!(
            path = %self.record_path.display(),
            missing = missing.len(),
            "Wrote missing-granule record"
        );
        Ok(())
    }

    /// Delete the record so the next check rescans. Returns whether one existed.
    pub fn clear_record(&self) -> Result<bool, ReconcileError> {
        match fs::remove_file(&self.record_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ReconcileError::WriteRecord {
                path: self.record_path.clone(),
                source: e,
            }),
        }
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granules() -> GranuleMap {
        [
            ("g1", vec!["https://h/a.h5", "https://h/a.xml"]),
            ("g2", vec!["https://h/b.h5"]),
            ("g3", vec!["https://h/c.h5?x=1"]),
        ]
        .into_iter()
        .map(|(name, urls)| (name.to_string(), urls.into_iter().map(String::from).collect()))
        .collect()
    }

    fn put(root: &Path, granule: &str, file: &str, contents: &[u8]) {
        fs::create_dir_all(root.join(granule)).unwrap();
        fs::write(root.join(granule).join(file), contents).unwrap();
    }

    #[test]
    fn test_scan_classifies_reasons() {
        let temp = tempfile::tempdir().unwrap();
        put(temp.path(), "g1", "a.h5", b"data");
        fs::create_dir_all(temp.path().join("g2")).unwrap();

        let missing = Reconciler::new(temp.path()).scan(&granules()).unwrap();

        assert_eq!(
            missing,
            vec![
                MissingGranule {
                    name: "g1".to_string(),
                    reason: MissingReason::MissingFiles(vec!["a.xml".to_string()]),
                },
                MissingGranule {
                    name: "g2".to_string(),
                    reason: MissingReason::EmptyDirectory,
                },
                MissingGranule {
                    name: "g3".to_string(),
                    reason: MissingReason::NoDirectory,
                },
            ]
        );
    }

    #[test]
    fn test_zero_sized_file_counts_as_missing() {
        let temp = tempfile::tempdir().unwrap();
        put(temp.path(), "g2", "b.h5", b"");

        let reason = Reconciler::new(temp.path())
            .check_granule("g2", &["https://h/b.h5".to_string()])
            .unwrap();
        assert_eq!(reason, Some(MissingReason::MissingFiles(vec!["b.h5".to_string()])));
    }

    #[test]
    fn test_complete_granule_is_not_missing() {
        let temp = tempfile::tempdir().unwrap();
        put(temp.path(), "g3", "c.h5", b"x");

        let reason = Reconciler::new(temp.path())
            .check_granule("g3", &["https://h/c.h5?x=1".to_string()])
            .unwrap();
        assert_eq!(reason, None);
    }

    #[test]
    fn test_find_missing_writes_then_reuses_record() {
        let temp = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(temp.path());

        let first = reconciler.find_missing(&granules()).unwrap();
        assert!(!first.from_record);
        assert_eq!(first.missing.len(), 3);
        assert!(reconciler.record_path().exists());

        // Files appearing later do not change the recorded answer.
        put(temp.path(), "g2", "b.h5", b"x");
        let second = reconciler.find_missing(&granules()).unwrap();
        assert!(second.from_record);
        assert_eq!(second.missing, first.missing);

        assert!(reconciler.clear_record().unwrap());
        let third = reconciler.find_missing(&granules()).unwrap();
        assert!(!third.from_record);
        assert_eq!(third.missing, vec!["g1".to_string(), "g3".to_string()]);
    }

    #[test]
    fn test_corrupt_record_is_recomputed() {
        let temp = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(temp.path());
        fs::write(reconciler.record_path(), b"[not json").unwrap();

        let result = reconciler.find_missing(&granules()).unwrap();

        assert!(!result.from_record);
        assert_eq!(reconciler.load_record(), Some(result.missing));
    }

    #[test]
    fn test_record_is_pretty_json_list() {
        let temp = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(temp.path());
        reconciler.save_record(&["g1".to_string()]).unwrap();

        let raw = fs::read_to_string(reconciler.record_path()).unwrap();
        assert_eq!(raw, "[\n  \"g1\"\n]");
    }
}
