//! Error kinds for sync operations.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that can occur while applying a sync operation.
///
/// All of these are handled where they surface: logged once at a fitting
/// severity, then the event loop moves on. Nothing here terminates the
/// daemon.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A message referenced a GUID the tree does not know.
    #[error("unknown instance: {0}")]
    UnknownReference(String),

    /// A filesystem write, delete, or watch failed.
    #[error("filesystem unavailable at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A transport frame did not parse as a catalogued message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl SyncError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
