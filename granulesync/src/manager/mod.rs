//! Collection download manager.
//!
//! [`CollectionDownloadManager`] ties the engine together for one download
//! directory: it selects what still needs downloading from a
//! [`CollectionPayload`](crate::payload::CollectionPayload), runs the parallel
//! scheduler, retries recorded failures and reconciles the state store with
//! the files actually on disk.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use granulesync::auth::NetrcCredentials;
//! use granulesync::manager::{CollectionDownloadManager, DownloaderConfig};
//! use granulesync::payload::CollectionPayload;
//! use granulesync::transport::ReqwestTransport;
//!
//! let credentials = Arc::new(NetrcCredentials::new(None));
//! let transport = Arc::new(ReqwestTransport::new()?.with_credentials(credentials.clone()));
//! let manager = CollectionDownloadManager::new(
//!     DownloaderConfig::new("/data/gedi"),
//!     transport,
//!     credentials,
//! )?;
//!
//! let payload = CollectionPayload::load("GEDI02_B_payload.bin".as_ref())?;
//! let stats = manager.download_collection(&payload);
//! println!("{}", stats);
//! ```

mod collection;
mod config;
mod error;

pub use collection::CollectionDownloadManager;
pub use config::DownloaderConfig;
pub use error::{ManagerError, ManagerResult};
