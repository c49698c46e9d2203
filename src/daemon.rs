//! Daemon Infrastructure - Background service for periodic mirroring
//!
//! This module owns the interval loop around the reconciler: it runs a pass
//! immediately and then once per configured interval, never overlapping two
//! passes. It also handles PID file management and graceful shutdown.

use crate::sink::FileLogSink;
use crate::sync::{Reconciler, SyncSummary};
use crate::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Run a single pass using the configured roots, options and action log
pub fn run_pass(config: &Config) -> Result<SyncSummary> {
    let log_path = config.action_log_path();
    let sink = FileLogSink::open(&log_path, config.log.format)
        .with_context(|| format!("Failed to open action log: {}", log_path.display()))?;

    let source = config.source_path();
    let replica = config.replica_path();
    let mut reconciler = Reconciler::new(config.sync_options(), sink);

    reconciler
        .sync(&source, &replica)
        .with_context(|| format!("Sync pass {} -> {} failed", source.display(), replica.display()))
}

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    interval: Duration,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_receiver: Option<broadcast::Receiver<()>>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
    started_at: Instant,
    stats: PassStats,
}

/// Counters for passes run by this process
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    pub total_passes: u64,
    pub successful_passes: u64,
    pub failed_passes: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub last_pass: Option<Instant>,
    pub last_error: Option<String>,
}

/// Daemon statistics and status
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub uptime: Duration,
    pub stats: PassStats,
    pub next_sync_in: Option<Duration>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid daemon configuration")?;
        let interval = config.interval()?;

        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        let is_running = Arc::new(AtomicBool::new(false));

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded_path = shellexpand::full(&config.daemon.pid_file)
                .context("Failed to expand PID file path")?;
            Some(PathBuf::from(expanded_path.as_ref()))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            interval,
            shutdown_sender,
            shutdown_receiver: Some(shutdown_receiver),
            is_running,
            pid_file_path,
            started_at: Instant::now(),
            stats: PassStats::default(),
        })
    }

    /// Sender that stops the loop when a message is sent on it
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Start the daemon in the foreground
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting dirmirror daemon: {} -> {} every {:?}",
            self.config.source, self.config.replica, self.interval
        );

        self.write_pid_file().context("Failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = match self.shutdown_receiver.take() {
            Some(receiver) => receiver,
            None => self.shutdown_sender.subscribe(),
        };

        // Spawn shutdown signal handler
        let is_running = self.is_running.clone();
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let result = self.daemon_loop(shutdown_receiver).await;

        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Start the daemon as a background service (Unix platforms)
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let output = if !self.config.daemon.output_file.is_empty() {
            let path = PathBuf::from(&self.config.daemon.output_file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create daemon output directory")?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .context("Failed to open daemon output file")?;
            Some(file)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();

        if let Some(pid_path) = &self.pid_file_path {
            daemonize = daemonize.pid_file(pid_path);
        }

        if let Some(file) = output {
            daemonize = daemonize.stdout(file.try_clone()?).stderr(file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        info!("dirmirror daemon started as background service");
        Ok(())
    }

    /// Stop a running daemon by sending a shutdown signal
    pub fn stop(&self) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        let Some(pid_file) = &self.pid_file_path else {
            warn!("No PID file configured, cannot stop daemon");
            return Ok(());
        };

        if !pid_file.exists() {
            warn!("PID file not found, daemon may not be running");
            return Ok(());
        }

        let pid = read_pid(pid_file)?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .context("Failed to send SIGTERM to daemon process")?;
        }

        #[cfg(not(unix))]
        {
            warn!("Daemon stop not implemented for this platform");
        }

        info!("Shutdown signal sent to daemon process {}", pid);
        Ok(())
    }

    /// Get current daemon status
    pub fn status(&self) -> DaemonStatus {
        let is_running = self.is_running.load(Ordering::SeqCst);

        let next_sync_in = match (is_running, self.stats.last_pass) {
            (true, Some(last)) => Some(self.interval.saturating_sub(last.elapsed())),
            (true, None) => Some(Duration::ZERO),
            (false, _) => None,
        };

        DaemonStatus {
            is_running,
            uptime: self.started_at.elapsed(),
            stats: self.stats.clone(),
            next_sync_in,
        }
    }

    /// Main daemon loop - one pass per tick, the first tick fires immediately
    async fn daemon_loop(&mut self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let mut interval_timer = interval(self.interval);
        // A long pass pushes the schedule back instead of triggering a burst
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Daemon loop started with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                _ = interval_timer.tick() => {
                    if !self.is_running.load(Ordering::SeqCst) {
                        break;
                    }

                    debug!("Starting scheduled sync pass");
                    self.run_scheduled_pass().await;
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    async fn run_scheduled_pass(&mut self) {
        let config = self.config.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || run_pass(&config))
            .await
            .context("Sync task panicked")
            .and_then(|result| result);

        self.stats.total_passes += 1;
        self.stats.last_pass = Some(started);

        match result {
            Ok(summary) => {
                self.stats.successful_passes += 1;
                self.stats.files_copied += summary.files_copied as u64;
                self.stats.files_deleted += summary.files_deleted as u64;
                self.stats.last_error = None;
                self.log_sync_success(&summary, started.elapsed());
            }
            Err(e) => {
                self.stats.failed_passes += 1;
                self.stats.last_error = Some(format!("{:#}", e));
                self.log_sync_failure(&e);
            }
        }
    }

    /// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
    async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        result = tokio::signal::ctrl_c() => {
                            if let Err(e) = result {
                                error!("Failed to listen for Ctrl+C: {}", e);
                            }
                        }
                        _ = terminate.recv() => debug!("SIGTERM received"),
                    }
                    return;
                }
                Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        debug!("Ctrl+C received");
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }

    fn log_sync_success(&self, summary: &SyncSummary, duration: Duration) {
        if summary.has_failures() {
            warn!(
                "Sync pass finished in {:.2}s with {} failed files: {} copied, {} removed, {} unchanged",
                duration.as_secs_f64(),
                summary.failures.len(),
                summary.files_copied,
                summary.files_deleted,
                summary.files_unchanged
            );
        } else {
            info!(
                "Sync pass completed in {:.2}s: {} copied, {} removed, {} unchanged",
                duration.as_secs_f64(),
                summary.files_copied,
                summary.files_deleted,
                summary.files_unchanged
            );
        }
    }

    fn log_sync_failure(&self, error: &anyhow::Error) {
        error!("Sync pass failed: {:#}", error);
    }
}

fn read_pid(pid_file: &std::path::Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;
    pid_str.trim().parse().context("Invalid PID in PID file")
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if config.daemon.pid_file.is_empty() {
        return Ok(false);
    }

    let expanded_path =
        shellexpand::full(&config.daemon.pid_file).context("Failed to expand PID file path")?;
    let pid_file = PathBuf::from(expanded_path.as_ref());

    if !pid_file.exists() {
        return Ok(false);
    }

    let pid = read_pid(&pid_file)?;

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => {
                // Process doesn't exist, remove stale PID file
                let _ = fs::remove_file(&pid_file);
                Ok(false)
            }
            Err(_) => Ok(true), // Assume running if we can't check
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(true)
    }
}

/// PID recorded in the configured PID file, if any
pub fn daemon_pid(config: &Config) -> Option<u32> {
    let expanded = shellexpand::full(&config.daemon.pid_file).ok()?;
    read_pid(std::path::Path::new(expanded.as_ref())).ok()
}
