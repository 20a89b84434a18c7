//! Collection payloads.
//!
//! A payload maps exactly one collection identifier to its granules, and each
//! granule to the ordered list of URLs that make it up:
//!
//! ```text
//! { "GEDI02_B": { "GEDI02_B_2021...": ["https://.../a.h5", "https://.../a.xml"] } }
//! ```
//!
//! Payloads are produced by a catalog query outside this crate and are
//! read-only here. They can be cached on disk either as bincode (the default)
//! or as JSON when the file name ends in `.json`.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Granule name → ordered download URLs.
pub type GranuleMap = BTreeMap<String, Vec<String>>;

/// The nested on-disk shape: collection → granule → URLs.
pub type NestedPayload = BTreeMap<String, GranuleMap>;

/// Errors raised while building, loading or saving a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload did not contain exactly one collection.
    #[error("payload must contain exactly one collection, found {0}")]
    CollectionCount(usize),

    /// A granule name cannot be used as a directory name.
    #[error("invalid granule name {0:?}")]
    InvalidGranuleName(String),

    /// A granule has an empty URL list.
    #[error("granule {granule} has no URLs")]
    EmptyGranule { granule: String },

    /// No filename can be derived from a URL.
    #[error("granule {granule}: cannot derive a filename from {url}")]
    InvalidUrl { granule: String, url: String },

    /// Two URLs of the same granule would be written to the same file.
    #[error("granule {granule}: {first} and {second} both resolve to {filename}")]
    DuplicateFilename {
        granule: String,
        filename: String,
        first: String,
        second: String,
    },

    /// Reading or writing the payload file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The payload file could not be decoded.
    #[error("failed to decode payload {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// The payload could not be encoded.
    #[error("failed to encode payload {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
}

/// Derive the on-disk filename for a URL: its final path segment, with any
/// query string or fragment removed.
///
/// Returns `None` when the URL ends in `/` or is empty.
pub fn filename_from_url(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => Some(name),
        _ => None,
    }
}

/// Default cache file name for a collection's payload.
pub fn default_payload_filename(collection: &str) -> String {
    format!("{}_payload.bin", collection)
}

/// A validated collection payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPayload {
    collection: String,
    granules: GranuleMap,
}

impl CollectionPayload {
    /// Build a payload, validating every granule.
    ///
    /// # Errors
    ///
    /// Rejects granule names that are not a single path component, empty URL
    /// lists, URLs without a filename, and URLs of one granule that share a
    /// filename (they would overwrite each other on disk).
    pub fn new(collection: impl Into<String>, granules: GranuleMap) -> Result<Self, PayloadError> {
        for (name, urls) in &granules {
            validate_granule(name, urls)?;
        }
        Ok(Self {
            collection: collection.into(),
            granules,
        })
    }

    /// Build a payload from the nested `{collection: {granule: [url]}}` shape.
    pub fn from_nested(nested: NestedPayload) -> Result<Self, PayloadError> {
        if nested.len() != 1 {
            return Err(PayloadError::CollectionCount(nested.len()));
        }
        let (collection, granules) = nested
            .into_iter()
            .next()
            .ok_or(PayloadError::CollectionCount(0))?;
        Self::new(collection, granules)
    }

    /// Convert back into the nested shape.
    pub fn to_nested(&self) -> NestedPayload {
        let mut nested = NestedPayload::new();
        nested.insert(self.collection.clone(), self.granules.clone());
        nested
    }

    /// The collection identifier.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// All granules of the collection.
    pub fn granules(&self) -> &GranuleMap {
        &self.granules
    }

    /// Number of granules.
    pub fn len(&self) -> usize {
        self.granules.len()
    }

    /// Whether the collection has no granules.
    pub fn is_empty(&self) -> bool {
        self.granules.is_empty()
    }

    /// URLs of a single granule.
    pub fn urls(&self, granule: &str) -> Option<&[String]> {
        self.granules.get(granule).map(Vec::as_slice)
    }

    /// The granules whose names satisfy `keep`.
    pub fn select<F>(&self, mut keep: F) -> GranuleMap
    where
        F: FnMut(&str) -> bool,
    {
        self.granules
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(name, urls)| (name.clone(), urls.clone()))
            .collect()
    }

    /// Load a payload from disk.
    ///
    /// Files ending in `.json` are read as JSON, anything else as bincode.
    pub fn load(path: &Path) -> Result<Self, PayloadError> {
        let file = File::open(path).map_err(|e| PayloadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let nested: NestedPayload = if is_json(path) {
            serde_json::from_reader(reader).map_err(|e| PayloadError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            bincode::deserialize_from(reader).map_err(|e| PayloadError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        let payload = Self::from_nested(nested)?;
        tracing::info!(
            path = %path.display(),
            collection = %payload.collection,
            granules = payload.len(),
            "Loaded collection payload"
        );
        Ok(payload)
    }

    /// Save the payload to disk, writing a temporary file and renaming it
    /// into place.
    pub fn save(&self, path: &Path) -> Result<(), PayloadError> {
        let io_err = |source: io::Error| PayloadError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path).map_err(io_err)?;
        let writer = BufWriter::new(file);
        let nested = self.to_nested();

        let encoded = if is_json(path) {
            serde_json::to_writer(writer, &nested).map_err(|e| e.to_string())
        } else {
            bincode::serialize_into(writer, &nested).map_err(|e| e.to_string())
        };
        if let Err(reason) = encoded {
            std::fs::remove_file(&temp_path).ok();
            return Err(PayloadError::Encode {
                path: path.to_path_buf(),
                reason,
            });
        }

        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn validate_granule(name: &str, urls: &[String]) -> Result<(), PayloadError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(PayloadError::InvalidGranuleName(name.to_string()));
    }
    if urls.is_empty() {
        return Err(PayloadError::EmptyGranule {
            granule: name.to_string(),
        });
    }

    let mut seen: HashMap<&str, &str> = HashMap::with_capacity(urls.len());
    for url in urls {
        let filename = filename_from_url(url).ok_or_else(|| PayloadError::InvalidUrl {
            granule: name.to_string(),
            url: url.clone(),
        })?;
        if let Some(first) = seen.insert(filename, url) {
            return Err(PayloadError::DuplicateFilename {
                granule: name.to_string(),
                filename: filename.to_string(),
                first: first.to_string(),
                second: url.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granules(entries: &[(&str, &[&str])]) -> GranuleMap {
        entries
            .iter()
            .map(|(name, urls)| {
                (
                    name.to_string(),
                    urls.iter().map(|u| u.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://h/a/b/f1.bin"), Some("f1.bin"));
        assert_eq!(filename_from_url("https://h/f.h5?token=abc"), Some("f.h5"));
        assert_eq!(filename_from_url("https://h/f.h5#part"), Some("f.h5"));
        assert_eq!(filename_from_url("https://h/dir/"), None);
        assert_eq!(filename_from_url(""), None);
    }

    #[test]
    fn test_from_nested_requires_single_collection() {
        let mut nested = NestedPayload::new();
        assert!(matches!(
            CollectionPayload::from_nested(nested.clone()),
            Err(PayloadError::CollectionCount(0))
        ));

        nested.insert("A".to_string(), GranuleMap::new());
        nested.insert("B".to_string(), GranuleMap::new());
        assert!(matches!(
            CollectionPayload::from_nested(nested),
            Err(PayloadError::CollectionCount(2))
        ));
    }

    #[test]
    fn test_rejects_duplicate_filenames() {
        let result = CollectionPayload::new(
            "X",
            granules(&[("g1", &["https://a/f.bin", "https://b/f.bin"])]),
        );
        match result {
            Err(PayloadError::DuplicateFilename { filename, .. }) => assert_eq!(filename, "f.bin"),
            other => panic!("expected duplicate filename error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_granule_and_bad_names() {
        assert!(matches!(
            CollectionPayload::new("X", granules(&[("g1", &[])])),
            Err(PayloadError::EmptyGranule { .. })
        ));
        assert!(matches!(
            CollectionPayload::new("X", granules(&[("../escape", &["https://h/f"])])),
            Err(PayloadError::InvalidGranuleName(_))
        ));
        assert!(matches!(
            CollectionPayload::new("X", granules(&[("g1", &["https://h/dir/"])])),
            Err(PayloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_select_filters_by_name() {
        let payload = CollectionPayload::new(
            "X",
            granules(&[("g1", &["https://h/1"]), ("g2", &["https://h/2"])]),
        )
        .unwrap();

        let selected = payload.select(|name| name == "g2");
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("g2"));
    }

    #[test]
    fn test_save_and_load_bincode_and_json() {
        let temp = tempfile::tempdir().unwrap();
        let payload = CollectionPayload::new(
            "GEDI02_B",
            granules(&[("g1", &["https://h/f1.bin", "https://h/f1.xml"])]),
        )
        .unwrap();

        let bin_path = temp.path().join(default_payload_filename("GEDI02_B"));
        payload.save(&bin_path).unwrap();
        assert_eq!(CollectionPayload::load(&bin_path).unwrap(), payload);

        let json_path = temp.path().join("payload.json");
        payload.save(&json_path).unwrap();
        let raw = std::fs::read_to_string(&json_path).unwrap();
        assert!(raw.contains("\"GEDI02_B\""));
        assert_eq!(CollectionPayload::load(&json_path).unwrap(), payload);
    }

    #[test]
    fn test_load_garbage_is_decode_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            CollectionPayload::load(&path),
            Err(PayloadError::Decode { .. })
        ));
    }
}
