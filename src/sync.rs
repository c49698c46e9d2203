//! Tree Reconciler - makes a replica directory mirror a source directory
//!
//! A pass runs in two phases. Propagate walks the source tree, creates every
//! directory under the replica and copies each file whose replica copy is
//! missing or differs by content digest. Prune then walks the replica and
//! deletes every file with no counterpart path under the source. Propagate
//! always finishes before Prune starts.
//!
//! Nothing is remembered between passes: every call recomputes digests from
//! the bytes on disk.

use crate::digest::file_digest;
use crate::error::{Result, SyncError};
use crate::lock::ReplicaLock;
use crate::sink::LogSink;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A mutating action taken during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// A source file was copied over its replica path
    Copy { source: PathBuf, destination: PathBuf },
    /// An orphaned replica file was deleted
    Delete { path: PathBuf },
}

impl SyncAction {
    pub fn is_copy(&self) -> bool {
        matches!(self, SyncAction::Copy { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, SyncAction::Delete { .. })
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Copy {
                source,
                destination,
            } => write!(f, "Copied: {} -> {}", source.display(), destination.display()),
            SyncAction::Delete { path } => write!(f, "Removed: {}", path.display()),
        }
    }
}

/// What to do when a single file fails mid-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the pass and return the error
    #[default]
    Abort,
    /// Record the failure and carry on with the rest of the tree
    Continue,
}

/// Behaviour switches for a [`Reconciler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub on_error: ErrorPolicy,
    /// Remove replica directories that are empty and absent from the source
    pub prune_empty_dirs: bool,
    /// Hold an exclusive lock next to the replica root for the whole pass
    pub lock_replica: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::Abort,
            prune_empty_dirs: false,
            lock_replica: true,
        }
    }
}

/// A file that failed under [`ErrorPolicy::Continue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub actions: Vec<SyncAction>,
    pub files_copied: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub dirs_removed: usize,
    pub failures: Vec<SyncFailure>,
    pub duration: Duration,
}

impl SyncSummary {
    /// True when the pass made no changes and hit no failures
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && self.failures.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs reconciliation passes and reports actions to a log sink
pub struct Reconciler<S: LogSink> {
    options: SyncOptions,
    sink: S,
}

impl<S: LogSink> Reconciler<S> {
    pub fn new(options: SyncOptions, sink: S) -> Self {
        Self { options, sink }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run one full pass making `replica` mirror `source`
    pub fn sync(&mut self, source: &Path, replica: &Path) -> Result<SyncSummary> {
        let started = Instant::now();
        check_roots(source, replica)?;

        if !replica.exists() {
            fs::create_dir_all(replica)
                .map_err(|e| SyncError::io(replica, "creating replica root", e))?;
            info!("Created replica root: {}", replica.display());
        }

        // Released on every exit path when the guard drops
        let _lock = if self.options.lock_replica {
            ReplicaLock::acquire_or_skip(replica)?
        } else {
            None
        };

        let mut summary = SyncSummary::default();
        self.propagate(source, replica, &mut summary)?;
        self.prune(source, replica, &mut summary)?;
        if self.options.prune_empty_dirs {
            self.prune_dirs(source, replica, &mut summary)?;
        }

        summary.duration = started.elapsed();
        debug!(
            "Pass finished in {:.2}s: {} copied, {} removed, {} unchanged, {} failed",
            summary.duration.as_secs_f64(),
            summary.files_copied,
            summary.files_deleted,
            summary.files_unchanged,
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Compute the actions a pass would take without touching either tree
    pub fn plan(&self, source: &Path, replica: &Path) -> Result<Vec<SyncAction>> {
        check_roots(source, replica)?;
        let mut actions = Vec::new();

        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(walk_error(source))?;
            if entry.depth() == 0 || !is_copyable(&entry) {
                continue;
            }
            let destination = replica.join(relative(&entry, source));
            if needs_copy(entry.path(), &destination)? {
                actions.push(SyncAction::Copy {
                    source: entry.path().to_path_buf(),
                    destination,
                });
            }
        }

        if replica.is_dir() {
            for entry in WalkDir::new(replica).sort_by_file_name() {
                let entry = entry.map_err(walk_error(replica))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if is_orphan(&source.join(relative(&entry, replica)))? {
                    actions.push(SyncAction::Delete {
                        path: entry.path().to_path_buf(),
                    });
                }
            }
        }

        Ok(actions)
    }

    fn propagate(&mut self, source: &Path, replica: &Path, summary: &mut SyncSummary) -> Result<()> {
        let mut walker = WalkDir::new(source).sort_by_file_name().into_iter();

        while let Some(entry) = walker.next() {
            let entry = match self.tolerate(entry.map_err(walk_error(source)), summary)? {
                Some(entry) => entry,
                None => continue,
            };
            if entry.depth() == 0 {
                continue;
            }

            let target = replica.join(relative(&entry, source));
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let created = fs::create_dir_all(&target)
                    .map_err(|e| SyncError::io(&target, "creating directory", e));
                if self.tolerate(created, summary)?.is_none() {
                    walker.skip_current_dir();
                }
            } else if is_copyable(&entry) {
                let outcome = needs_copy(entry.path(), &target).and_then(|copy| {
                    if copy {
                        copy_file(entry.path(), &target)?;
                    }
                    Ok(copy)
                });

                match self.tolerate(outcome, summary)? {
                    Some(true) => {
                        summary.files_copied += 1;
                        self.emit(
                            SyncAction::Copy {
                                source: entry.path().to_path_buf(),
                                destination: target,
                            },
                            summary,
                        )?;
                    }
                    Some(false) => {
                        summary.files_unchanged += 1;
                        debug!("Unchanged: {}", target.display());
                    }
                    None => {}
                }
            } else {
                debug!("Skipping non-regular entry: {}", entry.path().display());
            }
        }

        Ok(())
    }

    fn prune(&mut self, source: &Path, replica: &Path, summary: &mut SyncSummary) -> Result<()> {
        for entry in WalkDir::new(replica).sort_by_file_name() {
            let entry = match self.tolerate(entry.map_err(walk_error(replica)), summary)? {
                Some(entry) => entry,
                None => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let counterpart = source.join(relative(&entry, replica));
            let removed = is_orphan(&counterpart).and_then(|orphan| {
                if orphan {
                    fs::remove_file(entry.path())
                        .map_err(|e| SyncError::io(entry.path(), "deleting", e))?;
                }
                Ok(orphan)
            });

            if let Some(true) = self.tolerate(removed, summary)? {
                summary.files_deleted += 1;
                self.emit(
                    SyncAction::Delete {
                        path: entry.path().to_path_buf(),
                    },
                    summary,
                )?;
            }
        }

        Ok(())
    }

    fn prune_dirs(&mut self, source: &Path, replica: &Path, summary: &mut SyncSummary) -> Result<()> {
        for entry in WalkDir::new(replica).contents_first(true) {
            let entry = match self.tolerate(entry.map_err(walk_error(replica)), summary)? {
                Some(entry) => entry,
                None => continue,
            };
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                continue;
            }
            if source.join(relative(&entry, replica)).is_dir() {
                continue;
            }

            let empty = fs::read_dir(entry.path())
                .map(|mut children| children.next().is_none())
                .map_err(|e| SyncError::io(entry.path(), "reading directory", e));
            if let Some(true) = self.tolerate(empty, summary)? {
                let removed = fs::remove_dir(entry.path())
                    .map_err(|e| SyncError::io(entry.path(), "removing directory", e));
                if self.tolerate(removed, summary)?.is_some() {
                    summary.dirs_removed += 1;
                    info!("Removed directory: {}", entry.path().display());
                }
            }
        }

        Ok(())
    }

    fn emit(&mut self, action: SyncAction, summary: &mut SyncSummary) -> Result<()> {
        info!("{}", action);
        self.sink
            .record(&action)
            .map_err(|source| SyncError::Log { source })?;
        summary.actions.push(action);
        Ok(())
    }

    /// Apply the error policy: I/O failures are swallowed under `Continue`
    fn tolerate<T>(&self, result: Result<T>, summary: &mut SyncSummary) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e @ SyncError::Io { .. }) if self.options.on_error == ErrorPolicy::Continue => {
                warn!("Skipping after failure: {}", e);
                summary.failures.push(SyncFailure {
                    path: e.path_ref().map(Path::to_path_buf).unwrap_or_default(),
                    error: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Run one pass with default options
pub fn sync_directories<S: LogSink>(source: &Path, replica: &Path, sink: S) -> Result<SyncSummary> {
    Reconciler::new(SyncOptions::default(), sink).sync(source, replica)
}

/// Validate both roots before anything is mutated
pub fn check_roots(source: &Path, replica: &Path) -> Result<()> {
    match fs::metadata(source) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(SyncError::path(source, "source is not a directory")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SyncError::path(source, "source does not exist"))
        }
        Err(e) => return Err(SyncError::path(source, format!("source is not accessible: {}", e))),
    }

    match fs::metadata(replica) {
        Ok(meta) if !meta.is_dir() => {
            return Err(SyncError::path(replica, "replica exists but is not a directory"))
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SyncError::path(replica, format!("replica is not accessible: {}", e)))
        }
    }

    let source_abs = absolute(source)?;
    let replica_abs = absolute(replica)?;
    if replica_abs.starts_with(&source_abs) || source_abs.starts_with(&replica_abs) {
        return Err(SyncError::path(
            replica,
            format!("replica and source {} must not contain each other", source.display()),
        ));
    }

    Ok(())
}

/// Absolute, cleaned form of `path` with symlinks resolved in its longest
/// existing prefix
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| SyncError::path(path, format!("cannot resolve relative path: {}", e)))?
            .join(path)
    };
    let cleaned = path_clean::clean(joined);

    let mut existing = cleaned.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(mut resolved) = existing.canonicalize() {
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return Ok(cleaned.clone()),
        }
    }
}

fn relative<'a>(entry: &'a walkdir::DirEntry, root: &Path) -> &'a Path {
    entry.path().strip_prefix(root).unwrap_or_else(|_| entry.path())
}

fn walk_error(root: &Path) -> impl Fn(walkdir::Error) -> SyncError + '_ {
    move |e| {
        let path = e.path().unwrap_or(root).to_path_buf();
        SyncError::io(path, "walking", io::Error::from(e))
    }
}

/// Regular files, plus symlinks whose target is a regular file
fn is_copyable(entry: &walkdir::DirEntry) -> bool {
    let file_type = entry.file_type();
    file_type.is_file()
        || (file_type.is_symlink()
            && fs::metadata(entry.path())
                .map(|meta| meta.is_file())
                .unwrap_or(false))
}

/// A replica file needs copying when it is missing or its bytes differ
fn needs_copy(source: &Path, destination: &Path) -> Result<bool> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_file() => Ok(file_digest(source)? != file_digest(destination)?),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(SyncError::io(destination, "inspecting", e)),
    }
}

/// Orphan test is by path existence only
fn is_orphan(counterpart: &Path) -> Result<bool> {
    match counterpart.try_exists() {
        Ok(exists) => Ok(!exists),
        // Some ancestor of the counterpart is a file in the source
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => Ok(true),
        Err(e) => Err(SyncError::io(counterpart, "checking", e)),
    }
}

/// Copy through a temporary sibling so the final path is never half-written
fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = destination.with_file_name(format!(".{}.{}.dirmirror-tmp", file_name, std::process::id()));

    let result = copy_via(source, &temp, destination);
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn copy_via(source: &Path, temp: &Path, destination: &Path) -> Result<()> {
    fs::copy(source, temp).map_err(|e| SyncError::io(source, "copying", e))?;

    let meta = fs::metadata(source).map_err(|e| SyncError::io(source, "reading metadata of", e))?;
    filetime::set_file_times(
        temp,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(|e| SyncError::io(temp, "setting timestamps on", e))?;

    fs::rename(temp, destination).map_err(|e| SyncError::io(destination, "replacing", e))
}
