//! Single-file fetching.
//!
//! [`FileFetcher`] downloads one URL into a directory. It owns the
//! filesystem side of idempotence: a destination that already exists with a
//! non-zero size is treated as done, so a file under its final name must
//! always be complete. Bodies are streamed into `<name>.part` and renamed
//! into place only after the last byte is flushed; on any failure the
//! partial file is removed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::auth::{ensure_authenticated, CredentialProvider};
use crate::payload::filename_from_url;
use crate::transport::{Transport, TransportError};

/// Buffer size for streaming a body to disk (64KB).
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of in-progress downloads.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Errors from fetching a single file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No filename can be derived from the URL.
    #[error("cannot derive a filename from {url}")]
    InvalidUrl { url: String },

    /// Credentials could not be acquired.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The transport failed (after its own retries).
    #[error("failed to download {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    /// Reading the response body failed mid-stream.
    #[error("failed to download {url}: read error: {source}")]
    Read {
        url: String,
        #[source]
        source: io::Error,
    },

    /// The server answered with an empty body.
    #[error("empty response body from {url}")]
    EmptyBody { url: String },

    /// A local filesystem operation failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Final location of the file.
    pub path: PathBuf,
    /// Size of the file on disk.
    pub bytes: u64,
    /// Whether the file was already present and no request was made.
    pub skipped: bool,
    /// Time spent downloading (zero when skipped).
    pub elapsed: Duration,
}

/// Downloads single URLs into directories.
pub struct FileFetcher {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
}

impl FileFetcher {
    /// Create a fetcher from a transport and credential provider.
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    /// Download `url` into `target_dir`.
    ///
    /// The file is named after the URL's final path segment. An existing
    /// non-empty file is returned as-is without contacting the server.
    pub fn fetch(&self, url: &str, target_dir: &Path) -> Result<FetchedFile, FetchError> {
        let filename = filename_from_url(url).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        fs::create_dir_all(target_dir).map_err(|e| FetchError::Write {
            path: target_dir.to_path_buf(),
            source: e,
        })?;

        let dest = target_dir.join(filename);
        if let Some(bytes) = existing_size(&dest) {
            tracing::debug!(path = %dest.display(), bytes, "File already present, skipping");
            return Ok(FetchedFile {
                path: dest,
                bytes,
                skipped: true,
                elapsed: Duration::ZERO,
            });
        }

        if !ensure_authenticated(self.credentials.as_ref()) {
            return Err(FetchError::AuthenticationFailed);
        }

        let partial = partial_path(&dest);
        let start = Instant::now();
        tracing::debug!(url, path = %dest.display(), "Downloading");

        match self.stream_to(url, &partial, &dest) {
            Ok(bytes) => {
                let elapsed = start.elapsed();
                tracing::debug!(
                    path = %dest.display(),
                    size_mb = format!("{:.2}", bytes as f64 / 1024.0 / 1024.0),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Download complete"
                );
                Ok(FetchedFile {
                    path: dest,
                    bytes,
                    skipped: false,
                    elapsed,
                })
            }
            Err(e) => {
                remove_if_present(&partial);
                remove_if_present(&dest);
                tracing::error!(url, error = %e, "Download failed");
                Err(e)
            }
        }
    }

    /// Stream the body of `url` into `partial`, then rename it to `dest`.
    fn stream_to(&self, url: &str, partial: &Path, dest: &Path) -> Result<u64, FetchError> {
        let mut body = self.transport.get(url).map_err(|e| FetchError::Transport {
            url: url.to_string(),
            source: e,
        })?;

        let file = File::create(partial).map_err(write_error(partial))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let bytes_read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(FetchError::Read {
                        url: url.to_string(),
                        source: e,
                    })
                }
            };

            writer
                .write_all(&buffer[..bytes_read])
                .map_err(write_error(partial))?;
            written += bytes_read as u64;
        }

        let file = writer
            .into_inner()
            .map_err(|e| FetchError::Write {
                path: partial.to_path_buf(),
                source: e.into_error(),
            })?;
        file.sync_all().map_err(write_error(partial))?;
        drop(file);

        // Files under their final name are never empty.
        if written == 0 {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        fs::rename(partial, dest).map_err(write_error(dest))?;
        Ok(written)
    }
}

/// Path of the in-progress file for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> FetchError {
    let path = path.to_path_buf();
    move |source| FetchError::Write { path, source }
}

/// Size of `path` if it is a non-empty regular file.
fn existing_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
