use crate::sink::LogFormat;
use crate::sync::{ErrorPolicy, SyncOptions};
use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for dirmirror
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory whose contents are mirrored
    #[serde(default)]
    pub source: String,

    /// Directory kept identical to the source
    #[serde(default)]
    pub replica: String,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Action log settings
    #[serde(default)]
    pub log: ActionLogConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Time between passes
    #[serde(default = "default_interval")]
    pub interval: String, // "30s", "5m", "1h"

    /// Behaviour when a single file fails
    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Remove replica directories that no longer exist in the source
    #[serde(default)]
    pub prune_empty_dirs: bool,

    /// Hold an advisory lock next to the replica during each pass
    #[serde(default = "default_true")]
    pub lock_replica: bool,
}

/// Action log configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActionLogConfig {
    /// File every copy and removal is appended to
    #[serde(default = "default_action_log")]
    pub file: String,

    /// Line format
    #[serde(default)]
    pub format: LogFormat,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Where a detached daemon's stdout/stderr go
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" or "full"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_interval() -> String {
    "60s".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/dirmirror.pid", runtime_dir)
    } else {
        "/tmp/dirmirror.pid".to_string()
    }
}

fn data_dir() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/dirmirror", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/dirmirror", home)
    } else {
        "/tmp/dirmirror".to_string()
    }
}

fn default_action_log() -> String {
    format!("{}/actions.log", data_dir())
}
fn default_output_file() -> String {
    format!("{}/daemon.log", data_dir())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            on_error: ErrorPolicy::default(),
            prune_empty_dirs: false,
            lock_replica: default_true(),
        }
    }
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            file: default_action_log(),
            format: LogFormat::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            output_file: default_output_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

/// Parse duration strings like "30s", "5m", "1h", "2d" or bare seconds
pub fn parse_interval(value: &str) -> Result<Duration> {
    let value = value.trim().to_lowercase();

    let seconds = if let Some(n) = value.strip_suffix('s') {
        n.trim().parse::<u64>().context("Invalid seconds value")?
    } else if let Some(n) = value.strip_suffix('m') {
        n.trim().parse::<u64>().map(|v| v * 60).context("Invalid minutes value")?
    } else if let Some(n) = value.strip_suffix('h') {
        n.trim().parse::<u64>().map(|v| v * 3600).context("Invalid hours value")?
    } else if let Some(n) = value.strip_suffix('d') {
        n.trim().parse::<u64>().map(|v| v * 86400).context("Invalid days value")?
    } else {
        value
            .parse::<u64>()
            .context("Invalid interval format. Use format like '30s', '5m', '1h'")?
    };

    if seconds == 0 {
        bail!("Interval must be at least one second");
    }

    Ok(Duration::from_secs(seconds))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("dirmirror").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        for (name, field) in [
            ("source", &mut self.source),
            ("replica", &mut self.replica),
            ("log.file", &mut self.log.file),
            ("daemon.pid_file", &mut self.daemon.pid_file),
            ("daemon.output_file", &mut self.daemon.output_file),
        ] {
            if field.is_empty() {
                continue;
            }
            *field = shellexpand::full(field.as_str())
                .with_context(|| format!("Failed to expand {} path", name))?
                .into_owned();
        }

        Ok(())
    }

    pub fn source_path(&self) -> PathBuf {
        path_clean::clean(&self.source)
    }

    pub fn replica_path(&self) -> PathBuf {
        path_clean::clean(&self.replica)
    }

    pub fn action_log_path(&self) -> PathBuf {
        PathBuf::from(&self.log.file)
    }

    pub fn interval(&self) -> Result<Duration> {
        parse_interval(&self.sync.interval)
            .with_context(|| format!("Invalid sync interval: {:?}", self.sync.interval))
    }

    /// Reconciler options derived from the `sync` section
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            on_error: self.sync.on_error,
            prune_empty_dirs: self.sync.prune_empty_dirs,
            lock_replica: self.sync.lock_replica,
        }
    }

    /// Check that the settings needed to run a pass are present and sane
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            bail!("No source directory configured");
        }
        if self.replica.trim().is_empty() {
            bail!("No replica directory configured");
        }
        if self.source_path() == self.replica_path() {
            bail!("Source and replica must be different directories");
        }
        if self.log.file.trim().is_empty() {
            bail!("No action log file configured");
        }
        self.interval()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: String::new(),
            replica: String::new(),
            sync: SyncConfig::default(),
            log: ActionLogConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
