//! dirmirror - One-way Directory Mirroring Daemon
//!
//! dirmirror keeps a replica directory identical to a source directory. Each
//! pass copies files that are missing or whose content differs, removes
//! replica files that no longer exist in the source, and logs every action.
//!
//! ## Modules
//!
//! - [`digest`]: MD5 content digests used to compare files
//! - [`sync`]: the two-phase reconciler (propagate, then prune)
//! - [`sink`]: action log destinations
//! - [`daemon`]: interval scheduling, PID file and shutdown handling
//! - [`config`]: YAML configuration with XDG defaults
//! - [`health`]: preflight checks behind `dirmirror doctor`

pub mod config;
pub mod daemon;
pub mod digest;
pub mod error;
pub mod health;
pub mod lock;
pub mod sink;
pub mod sync;

pub use config::Config;
pub use daemon::{run_pass, Daemon};
pub use digest::{file_digest, same_content, FileDigest};
pub use error::SyncError;
pub use health::HealthCheck;
pub use sink::{FileLogSink, LogFormat, LogSink, MemorySink, NullSink};
pub use sync::{sync_directories, ErrorPolicy, Reconciler, SyncAction, SyncOptions, SyncSummary};
