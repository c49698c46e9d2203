//! Advisory lock over a replica root
//!
//! The lock file lives next to the replica, never inside it, so the prune
//! pass cannot see it as an orphan.

use crate::error::{Result, SyncError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock held for the lifetime of the guard
#[derive(Debug)]
pub struct ReplicaLock {
    file: File,
    path: PathBuf,
}

impl ReplicaLock {
    /// Location of the lock file for `replica`
    pub fn lock_path(replica: &Path) -> PathBuf {
        let name = replica
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let parent = replica.parent().unwrap_or(replica);
        parent.join(format!(".{}.dirmirror.lock", name))
    }

    /// Take the lock without blocking
    pub fn acquire(replica: &Path) -> Result<Self> {
        let path = Self::lock_path(&resolve(replica)?);
        let file =
            open_lock_file(&path).map_err(|e| SyncError::io(&path, "opening lock file", e))?;
        Self::lock(file, path)
    }

    /// Take the lock, or run unlocked when no lock file can be created next
    /// to the replica. Contention is still an error.
    pub fn acquire_or_skip(replica: &Path) -> Result<Option<Self>> {
        let path = Self::lock_path(&resolve(replica)?);
        match open_lock_file(&path) {
            Ok(file) => Self::lock(file, path).map(Some),
            Err(e) => {
                warn!(
                    "Cannot create replica lock {}: {}; syncing without it",
                    path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(file: File, path: PathBuf) -> Result<Self> {
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired replica lock: {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => Err(SyncError::Locked { path }),
            Err(e) => Err(SyncError::io(&path, "locking", e)),
        }
    }
}

/// The lock sits beside the resolved replica, so `.` or `sub/..` never put
/// it inside the tree being pruned
fn resolve(replica: &Path) -> Result<PathBuf> {
    replica
        .canonicalize()
        .map_err(|e| SyncError::io(replica, "resolving", e))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for ReplicaLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release replica lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released replica lock: {}", self.path.display());
        }
    }
}
