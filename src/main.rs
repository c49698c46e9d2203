use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dirmirror::config::LoggingConfig;
use dirmirror::daemon::{daemon_pid, is_daemon_running};
use dirmirror::{run_pass, Config, Daemon, HealthCheck, NullSink, Reconciler, SyncAction};

#[derive(Parser)]
#[command(name = "dirmirror")]
#[command(about = "One-way directory mirroring daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror SOURCE into REPLICA every INTERVAL, logging actions to LOG_FILE
    Run {
        /// Source directory path
        source: String,

        /// Replica directory path
        replica: String,

        /// Action log file path
        log_file: String,

        /// Sync interval ("30s", "5m", or bare seconds)
        interval: String,
    },

    /// Run a single sync pass
    Sync {
        /// Source directory (overrides config)
        #[arg(long)]
        source: Option<String>,

        /// Replica directory (overrides config)
        #[arg(long)]
        replica: Option<String>,

        /// Action log file (overrides config)
        #[arg(long)]
        log_file: Option<String>,

        /// Show what would change without touching the replica
        #[arg(long)]
        dry_run: bool,
    },

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// System health check and diagnostics
    Doctor,

    /// Write a configuration file
    Init {
        /// Source directory to mirror
        #[arg(long)]
        source: String,

        /// Replica directory to keep in sync
        #[arg(long)]
        replica: String,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // `init` creates the config file, so there may be nothing to load yet
    let config = match &cli.command {
        Commands::Init { .. } => {
            let mut config = Config::default();
            config.expand_paths()?;
            config
        }
        _ => load_config(cli.config.as_ref())?,
    };
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting dirmirror v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            source,
            replica,
            log_file,
            interval,
        } => cmd_run(source, replica, log_file, interval, config),
        Commands::Sync {
            source,
            replica,
            log_file,
            dry_run,
        } => cmd_sync(source, replica, log_file, dry_run, config),
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, config),
        Commands::Doctor => cmd_doctor(&config),
        Commands::Init {
            source,
            replica,
            force,
        } => cmd_init(source, replica, force, cli.config, config),
    }
}

/// Initialize logging from config, with `--verbose` and `RUST_LOG` taking precedence
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let fmt_layer = if logging.format == "full" {
        fmt::layer().with_ansi(logging.color).boxed()
    } else {
        fmt::layer().compact().with_ansi(logging.color).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Drive an async entry point on a fresh runtime
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Apply command-line overrides and expand them like config values
fn apply_overrides(
    config: &mut Config,
    source: Option<String>,
    replica: Option<String>,
    log_file: Option<String>,
) -> Result<()> {
    if let Some(source) = source {
        config.source = source;
    }
    if let Some(replica) = replica {
        config.replica = replica;
    }
    if let Some(log_file) = log_file {
        config.log.file = log_file;
    }
    config.expand_paths()
}

/// Foreground loop with positional arguments
fn cmd_run(
    source: String,
    replica: String,
    log_file: String,
    interval: String,
    mut config: Config,
) -> Result<()> {
    apply_overrides(&mut config, Some(source), Some(replica), Some(log_file))?;
    config.sync.interval = interval;
    // Ad-hoc runs don't claim the daemon PID file
    config.daemon.pid_file.clear();

    println!(
        "🔄 Mirroring {} -> {} every {} (Ctrl+C to stop)",
        config.source, config.replica, config.sync.interval
    );
    let mut daemon = Daemon::new(config)?;
    block_on(daemon.run())?
}

/// Run a single sync pass, or plan one with --dry-run
fn cmd_sync(
    source: Option<String>,
    replica: Option<String>,
    log_file: Option<String>,
    dry_run: bool,
    mut config: Config,
) -> Result<()> {
    apply_overrides(&mut config, source, replica, log_file)?;
    config.validate()?;

    let source = config.source_path();
    let replica = config.replica_path();

    if dry_run {
        println!("🔍 Dry run: {} -> {}", source.display(), replica.display());

        let reconciler = Reconciler::new(config.sync_options(), NullSink);
        let actions = reconciler.plan(&source, &replica)?;

        for action in &actions {
            match action {
                SyncAction::Copy { source, destination } => {
                    println!("   📥 Would copy: {} -> {}", source.display(), destination.display())
                }
                SyncAction::Delete { path } => println!("   🗑️  Would remove: {}", path.display()),
            }
        }

        let copies = actions.iter().filter(|a| a.is_copy()).count();
        println!("\n📈 Summary:");
        println!("   📥 Files to copy: {}", copies);
        println!("   🗑️  Files to remove: {}", actions.len() - copies);
        return Ok(());
    }

    println!("🔄 Syncing {} -> {}", source.display(), replica.display());
    let summary = run_pass(&config)?;

    println!("\n🎉 Sync Complete!");
    println!("   📥 Copied: {}", summary.files_copied);
    println!("   🗑️  Removed: {}", summary.files_deleted);
    println!("   ✅ Unchanged: {}", summary.files_unchanged);
    if summary.dirs_removed > 0 {
        println!("   📁 Directories removed: {}", summary.dirs_removed);
    }
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!("   📄 Action log: {}", config.log.file);

    if summary.has_failures() {
        println!("\n🔍 Failed Files:");
        for failure in &summary.failures {
            println!("   ❌ {}: {}", failure.path.display(), failure.error);
        }
        bail!("{} files failed to sync", summary.failures.len());
    }

    Ok(())
}

/// Handle daemon commands
fn cmd_daemon(daemon_command: DaemonCommands, config: Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            println!("🚀 Starting dirmirror daemon...");

            if is_daemon_running(&config)? {
                println!("⚠️  Daemon is already running!");
                println!("   Use 'dirmirror daemon stop' to stop it first");
                return Ok(());
            }

            let mut daemon = Daemon::new(config.clone())?;

            if foreground {
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
                return block_on(daemon.run())?;
            }

            #[cfg(unix)]
            {
                println!("✅ Detaching into background");
                println!("   PID file: {}", config.daemon.pid_file);
                println!("   Output: {}", config.daemon.output_file);
                println!("   Sync interval: {}", config.sync.interval);

                // Fork before any runtime threads exist
                daemon.daemonize()?;
                block_on(daemon.run())??;
            }

            #[cfg(not(unix))]
            {
                let _ = daemon;
                println!("❌ Background daemon mode not supported on this platform");
                println!("   Use --foreground to run in foreground mode");
            }
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping dirmirror daemon...");

            if !is_daemon_running(&config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            let daemon = Daemon::new(config)?;
            daemon.stop()?;

            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 dirmirror Daemon Status");

            if is_daemon_running(&config)? {
                println!("   🟢 Status: Running");
                if let Some(pid) = daemon_pid(&config) {
                    println!("   🆔 PID: {}", pid);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'dirmirror daemon start' to start the daemon");
            }

            println!("   📂 Source: {}", config.source);
            println!("   📂 Replica: {}", config.replica);
            println!("   🔄 Sync interval: {}", config.sync.interval);
            if !config.log.file.is_empty() {
                println!("   📄 Action log: {}", config.log.file);
            }
        }
    }

    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if !health.all_passed() {
        bail!("{} health checks failed", health.errors().len());
    }
    Ok(())
}

/// Write a config file with the given roots and default settings
fn cmd_init(
    source: String,
    replica: String,
    force: bool,
    config_path: Option<PathBuf>,
    config: Config,
) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            path
        );
    }

    let mut new_config = config;
    new_config.source = source;
    new_config.replica = replica;
    new_config.save(&path)?;

    println!("✅ dirmirror initialized successfully!");
    println!("   Config: {:?}", path);
    println!("   Source: {}", new_config.source);
    println!("   Replica: {}", new_config.replica);
    println!("   Next: run 'dirmirror doctor', then 'dirmirror sync'");

    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use dirmirror::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 dirmirror System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
