//! Action log sinks
//!
//! Every mutating action of a pass is handed to a [`LogSink`] as soon as it
//! happens. The default text format is one human-readable line per action:
//!
//! ```text
//! Copied: /data/a.txt -> /backup/a.txt
//! Removed: /backup/b.txt
//! ```

use crate::sync::SyncAction;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Output format of the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `Copied: <src> -> <dst>` / `Removed: <path>`
    #[default]
    Text,
    /// One JSON object per line with a timestamp
    Json,
}

/// Destination for action log records
#[cfg_attr(test, mockall::automock)]
pub trait LogSink: Send {
    /// Record a single action
    fn record(&mut self, action: &SyncAction) -> io::Result<()>;
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a Path>,
    path: &'a Path,
}

/// Render an action in the given format, without trailing newline
pub fn format_action(action: &SyncAction, format: LogFormat) -> io::Result<String> {
    match format {
        LogFormat::Text => Ok(action.to_string()),
        LogFormat::Json => {
            let record = match action {
                SyncAction::Copy {
                    source,
                    destination,
                } => JsonRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    action: "copy",
                    source: Some(source),
                    path: destination,
                },
                SyncAction::Delete { path } => JsonRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    action: "delete",
                    source: None,
                    path,
                },
            };
            Ok(serde_json::to_string(&record)?)
        }
    }
}

/// Appends action lines to a file
pub struct FileLogSink {
    file: File,
    format: LogFormat,
}

impl FileLogSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: &Path, format: LogFormat) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self { file, format })
    }
}

impl LogSink for FileLogSink {
    fn record(&mut self, action: &SyncAction) -> io::Result<()> {
        let line = format_action(action, self.format)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()
    }
}

/// Keeps formatted lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    format: LogFormat,
    lines: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: LogFormat) -> Self {
        Self {
            format,
            lines: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, action: &SyncAction) -> io::Result<()> {
        self.lines.push(format_action(action, self.format)?);
        Ok(())
    }
}

/// Discards every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn record(&mut self, _action: &SyncAction) -> io::Result<()> {
        Ok(())
    }
}
