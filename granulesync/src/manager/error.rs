//! Error types for the collection download manager.

use std::io;
use std::path::PathBuf;

use crate::reconcile::ReconcileError;
use crate::state::StateError;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur while managing a collection download.
#[derive(Debug)]
pub enum ManagerError {
    /// Failed to create the download directory.
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// The download state could not be loaded or persisted.
    State(StateError),

    /// The missing-granule check failed.
    Reconcile(ReconcileError),

    /// Invalid configuration.
    InvalidConfig(String),
}

impl std::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDirFailed { path, source } => {
                write!(
                    f,
                    "failed to create directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::State(e) => write!(f, "download state error: {}", e),
            Self::Reconcile(e) => write!(f, "missing-file check failed: {}", e),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateDirFailed { source, .. } => Some(source),
            Self::State(e) => Some(e),
            Self::Reconcile(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<StateError> for ManagerError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<ReconcileError> for ManagerError {
    fn from(e: ReconcileError) -> Self {
        Self::Reconcile(e)
    }
}
