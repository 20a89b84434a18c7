//! Statistics reported by the collection download manager.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Serialize a duration as fractional seconds.
pub(crate) fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Format a byte count with the largest fitting unit.
pub fn format_bytes(bytes: u64) -> String {
    let mb = bytes as f64 / BYTES_PER_MB;
    if mb >= 1024.0 * 1024.0 {
        format!("{:.2} TB", mb / 1024.0 / 1024.0)
    } else if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.2} MB", mb)
    }
}

/// Result of downloading a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    /// Granules in the payload.
    pub total: usize,
    /// Granules recorded as completed (cumulative across runs).
    pub completed: usize,
    /// Granules recorded as failed (cumulative across runs).
    pub failed: usize,
    /// Size of all downloaded files under the download directory.
    pub downloaded_bytes: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Set when the run was aborted (authentication failure).
    pub error: Option<String>,
}

impl CollectionStats {
    pub fn size_mb(&self) -> f64 {
        self.downloaded_bytes as f64 / BYTES_PER_MB
    }

    pub fn size_gb(&self) -> f64 {
        self.size_mb() / 1024.0
    }

    pub fn size_tb(&self) -> f64 {
        self.size_gb() / 1024.0
    }
}

impl fmt::Display for CollectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} completed, {} failed, {} on disk, {:.1}s",
            self.collection,
            self.completed,
            self.total,
            self.failed,
            format_bytes(self.downloaded_bytes),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Result of retrying failed granules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    /// Failed granules of the payload that were retried.
    pub retried: usize,
    /// Retried granules that now succeeded.
    pub succeeded: usize,
    /// Retried granules that failed again.
    pub failed: usize,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl fmt::Display for RetryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retried == 0 {
            return write!(f, "no failed granules to retry");
        }
        write!(
            f,
            "retried {}: {} succeeded, {} failed, {:.1}s",
            self.retried,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Result of a missing-file check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingStats {
    /// Granules in the payload.
    pub total: usize,
    /// Granules found missing on disk.
    pub missing: usize,
    /// Missing granules downloaded successfully by healing.
    pub downloaded: usize,
    /// Missing granules that failed to download while healing.
    pub failed: usize,
    /// The missing list came from an earlier record instead of a scan.
    pub from_record: bool,
    /// Set when healing was aborted (authentication failure).
    pub error: Option<String>,
}

impl fmt::Display for MissingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} granules missing", self.missing, self.total)?;
        if self.from_record {
            write!(f, " (from record)")?;
        }
        if self.downloaded > 0 || self.failed > 0 {
            write!(f, ", healed {}, {} failed", self.downloaded, self.failed)?;
        }
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Snapshot of the download directory without a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub downloaded_bytes: u64,
}

impl fmt::Display for DownloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} pending, {} on disk",
            self.completed,
            self.failed,
            self.pending,
            format_bytes(self.downloaded_bytes)
        )
    }
}
