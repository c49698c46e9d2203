//! System health checks for dirmirror
//!
//! This module provides preflight checks to verify the configured source,
//! replica and action log are usable before any pass runs.

use crate::lock::ReplicaLock;
use crate::Config;
use std::fs::OpenOptions;
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Source directory status
    pub source: CheckResult,
    /// Replica directory status
    pub replica: CheckResult,
    /// Action log status
    pub action_log: CheckResult,
    /// Sync interval status
    pub interval: CheckResult,
    /// Replica lock status (warning only, a pass may be running)
    pub lock: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        Self {
            source: Self::check_source(config),
            replica: Self::check_replica(config),
            action_log: Self::check_action_log(config),
            interval: Self::check_interval(config),
            lock: Self::check_lock(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.source.passed && self.replica.passed && self.action_log.passed && self.interval.passed
        // Lock contention is informational, not included in required checks
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check the source is a readable directory
    fn check_source(config: &Config) -> CheckResult {
        if config.source.trim().is_empty() {
            return CheckResult::error_with_details(
                "No source directory configured",
                "Set `source` in the config file or pass --source",
            );
        }

        let path = config.source_path();
        if !path.exists() {
            return CheckResult::error_with_details(
                "Source directory does not exist",
                path.display().to_string(),
            );
        }
        if !path.is_dir() {
            return CheckResult::error_with_details(
                "Source is not a directory",
                path.display().to_string(),
            );
        }

        match std::fs::read_dir(&path) {
            Ok(_) => CheckResult::ok_with_details("Source directory readable", path.display().to_string()),
            Err(e) => CheckResult::error_with_details("Source directory not readable", e.to_string()),
        }
    }

    /// Check the replica is a writable directory, or can be created
    fn check_replica(config: &Config) -> CheckResult {
        if config.replica.trim().is_empty() {
            return CheckResult::error_with_details(
                "No replica directory configured",
                "Set `replica` in the config file or pass --replica",
            );
        }

        let path = config.replica_path();
        if path.is_dir() {
            return match probe_writable(&path) {
                Ok(()) => CheckResult::ok_with_details("Replica directory writable", path.display().to_string()),
                Err(e) => CheckResult::error_with_details("Replica directory not writable", e),
            };
        }
        if path.exists() {
            return CheckResult::error_with_details(
                "Replica exists but is not a directory",
                path.display().to_string(),
            );
        }

        CheckResult::warning_with_details(
            "Replica directory does not exist yet",
            format!("It will be created on the first pass: {}", path.display()),
        )
    }

    /// Check the action log can be appended to
    fn check_action_log(config: &Config) -> CheckResult {
        let path = config.action_log_path();
        if path.as_os_str().is_empty() {
            return CheckResult::error("No action log file configured");
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return CheckResult::warning_with_details(
                    "Action log directory does not exist yet",
                    format!("It will be created on the first pass: {}", parent.display()),
                );
            }
        }

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(_) => CheckResult::ok_with_details("Action log writable", path.display().to_string()),
            Err(e) => CheckResult::error_with_details(
                "Action log not writable",
                format!("{}: {}", path.display(), e),
            ),
        }
    }

    /// Check the sync interval parses
    fn check_interval(config: &Config) -> CheckResult {
        match config.interval() {
            Ok(interval) => CheckResult::ok_with_details(
                "Sync interval valid",
                format!("{}s", interval.as_secs()),
            ),
            Err(e) => CheckResult::error_with_details("Invalid sync interval", format!("{:#}", e)),
        }
    }

    /// Check whether another process currently holds the replica lock
    fn check_lock(config: &Config) -> CheckResult {
        let replica = config.replica_path();
        if !config.sync.lock_replica {
            return CheckResult::ok("Replica locking disabled");
        }
        if config.replica.trim().is_empty() || !replica.is_dir() {
            return CheckResult::ok("No replica to lock yet");
        }

        match ReplicaLock::acquire(&replica) {
            Ok(lock) => CheckResult::ok_with_details("Replica lock available", lock.path().display().to_string()),
            Err(e) => CheckResult::warning_with_details("Replica lock unavailable", e.to_string()),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Source Directory", &self.source),
            ("Replica Directory", &self.replica),
            ("Action Log", &self.action_log),
            ("Sync Interval", &self.interval),
            ("Replica Lock", &self.lock),
        ]
    }
}

fn probe_writable(dir: &Path) -> std::result::Result<(), String> {
    let probe = dir.join(format!(".dirmirror-probe-{}", std::process::id()));
    std::fs::write(&probe, b"").map_err(|e| e.to_string())?;
    std::fs::remove_file(&probe).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn configured(dir: &TempDir) -> Config {
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();

        let mut config = Config::default();
        config.source = source.to_string_lossy().to_string();
        config.replica = dir.path().join("replica").to_string_lossy().to_string();
        config.log.file = dir.path().join("actions.log").to_string_lossy().to_string();
        config
    }

    fn passing() -> HealthCheck {
        HealthCheck {
            source: CheckResult::ok("Source OK"),
            replica: CheckResult::ok("Replica OK"),
            action_log: CheckResult::ok("Log OK"),
            interval: CheckResult::ok("Interval OK"),
            lock: CheckResult::ok("Lock OK"),
        }
    }

    #[test]
    fn test_check_result_ok_with_details() {
        let result = CheckResult::ok_with_details("Test passed", "Some details");
        assert!(result.passed);
        assert!(!result.is_warning);
        assert_eq!(result.details, Some("Some details".to_string()));
    }

    #[test]
    fn test_check_result_warning() {
        let result = CheckResult::warning_with_details("Test warning", "Warning details");
        assert!(result.passed); // Warnings still "pass"
        assert!(result.is_warning);
    }

    #[test]
    fn test_check_result_error_with_details() {
        let result = CheckResult::error_with_details("Test failed", "Error details");
        assert!(!result.passed);
        assert!(!result.is_warning);
        assert_eq!(result.details, Some("Error details".to_string()));
    }

    #[test]
    fn test_configured_tree_passes() {
        let dir = TempDir::new().unwrap();
        let health = HealthCheck::run(&configured(&dir));

        assert!(health.all_passed(), "{:?}", health.errors());
        // Replica is created lazily, so it only warns
        assert!(health.replica.is_warning);
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = configured(&dir);
        config.source = dir.path().join("missing").to_string_lossy().to_string();

        let result = HealthCheck::check_source(&config);
        assert!(!result.passed);
        assert!(result.details.is_some());
    }

    #[test]
    fn test_replica_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = configured(&dir);
        let file = dir.path().join("replica-file");
        std::fs::write(&file, "x").unwrap();
        config.replica = file.to_string_lossy().to_string();

        assert!(!HealthCheck::check_replica(&config).passed);
    }

    #[test]
    fn test_existing_replica_is_writable() {
        let dir = TempDir::new().unwrap();
        let config = configured(&dir);
        std::fs::create_dir_all(config.replica_path()).unwrap();

        let result = HealthCheck::check_replica(&config);
        assert!(result.passed);
        assert!(!result.is_warning);
        assert_eq!(std::fs::read_dir(config.replica_path()).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_interval_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = configured(&dir);
        config.sync.interval = "often".to_string();

        assert!(!HealthCheck::check_interval(&config).passed);
    }

    #[test]
    fn test_held_lock_warns() {
        let dir = TempDir::new().unwrap();
        let config = configured(&dir);
        std::fs::create_dir_all(config.replica_path()).unwrap();
        let _held = ReplicaLock::acquire(&config.replica_path()).unwrap();

        let result = HealthCheck::check_lock(&config);
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[test]
    fn test_all_passed_ignores_lock_warning() {
        let mut health = passing();
        health.lock = CheckResult::warning_with_details("Lock held", "pid 42");
        assert!(health.all_passed());
    }

    #[test]
    fn test_all_passed_with_failing_source() {
        let mut health = passing();
        health.source = CheckResult::error("Source missing");
        assert!(!health.all_passed());
    }

    #[test]
    fn test_errors_returns_only_errors() {
        let mut health = passing();
        health.source = CheckResult::error("Source error");
        health.action_log = CheckResult::error("Log error");
        health.lock = CheckResult::warning_with_details("Lock warning", "pid 42");

        let errors = health.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|r| !r.passed));
        assert_eq!(health.warnings().len(), 1);
    }

    #[test]
    fn test_all_checks_returns_all_five() {
        let health = passing();
        let checks = health.all_checks();
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0].0, "Source Directory");
        assert_eq!(checks[4].0, "Replica Lock");
    }
}
