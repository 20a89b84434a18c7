//! granulesync - resumable, concurrent downloads of granule-based datasets
//!
//! A remote dataset is published as a collection of granules, each a named
//! group of files. This library downloads whole collections over an
//! unreliable, rate-limited network and remembers, across restarts, which
//! granules are complete, which failed and why, and which have gone missing
//! from disk.
//!
//! The building blocks, leaves first:
//!
//! - [`transport`]: HTTP GET as a byte stream, with retries ([`transport::ReqwestTransport`])
//! - [`auth`]: credential capability ([`auth::CredentialProvider`]), `.netrc` provider
//! - [`fetch`]: one URL into one file, idempotently
//! - [`granule`]: all files of one granule, recorded in the state store
//! - [`scheduler`]: many granules on a bounded worker pool
//! - [`state`]: durable per-granule status
//! - [`reconcile`]: disk-versus-state consistency check
//! - [`manager`]: collection download, retry, missing-file repair

pub mod auth;
pub mod config;
pub mod fetch;
pub mod granule;
pub mod logging;
pub mod manager;
pub mod payload;
pub mod reconcile;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod transport;

pub use manager::{CollectionDownloadManager, DownloaderConfig, ManagerError};
pub use payload::{CollectionPayload, GranuleMap};
pub use stats::{CollectionStats, DownloadStats, MissingStats, RetryStats};
