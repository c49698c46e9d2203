//! Error types for the mirroring core
//!
//! The reconciler and comparator return [`SyncError`] so callers can tell a
//! bad root directory apart from a file that failed mid-pass. The binary and
//! daemon layers wrap these in `anyhow` with extra context.

use std::io;
use std::path::{Path, PathBuf};

/// Result type alias for mirroring operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while digesting, copying or pruning files
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// A file could not be read, copied or deleted
    #[error("I/O error while {operation} {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// A root directory is missing or not a directory
    #[error("Invalid root {}: {reason}", path.display())]
    Path { path: PathBuf, reason: String },

    /// Another process holds the replica lock
    #[error("Replica is locked by another process: {}", path.display())]
    Locked { path: PathBuf },

    /// The action log could not be written
    #[error("Failed to write action log: {source}")]
    Log {
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    pub(crate) fn io(path: impl AsRef<Path>, operation: &'static str, source: io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }

    pub(crate) fn path(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        SyncError::Path {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Path the error refers to, if any
    pub fn path_ref(&self) -> Option<&Path> {
        match self {
            SyncError::Io { path, .. } | SyncError::Path { path, .. } | SyncError::Locked { path } => {
                Some(path)
            }
            SyncError::Log { .. } => None,
        }
    }
}
