// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlord Daemon (ovld)
//!
//! Background process that owns the state and runs the ensure loop.
//!
//! Architecture:
//! - Ensure Loop: spawned task driving managers and the task runner
//! - Main Task: waits for signals and restart requests

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod lifecycle;

use ovl_engine::RestartType;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::lifecycle::{reboot_args, Config, LifecycleError};

/// Exit code asking the supervisor to start the daemon again.
const RESTART_EXIT_CODE: i32 = 42;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("ovld {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("ovld {}", env!("CARGO_PKG_VERSION"));
                println!("Overlord Daemon - owns the state document and runs its task graphs");
                println!();
                println!("USAGE:");
                println!("    ovld");
                println!();
                println!("The daemon is typically started by a service manager, which");
                println!("should start it again when it exits with code {RESTART_EXIT_CODE}.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: ovld [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    // Write startup marker to log (before tracing setup)
    write_startup_marker(&config)?;

    let log_guard = setup_logging(&config)?;

    info!("Starting daemon");

    let mut daemon = match lifecycle::startup(&config).await {
        Ok(daemon) => daemon,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("ovld is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            // Write error synchronously (tracing is non-blocking and may not flush in time)
            write_startup_error(&config, &e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("Daemon ready, state at {}", config.state_path.display());
    println!("READY");

    let mut restart_daemon = false;
    loop {
        tokio::select! {
            Some(restart) = daemon.restarts.recv() => {
                match reboot_args(restart) {
                    None => {
                        info!("Daemon restart requested, shutting down...");
                        restart_daemon = true;
                        break;
                    }
                    Some(args) => run_reboot(&config.reboot_command, restart, args).await,
                }
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }

            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    daemon.shutdown().await?;
    info!("Daemon stopped");
    drop(log_guard);

    if restart_daemon {
        std::process::exit(RESTART_EXIT_CODE);
    }
    Ok(())
}

/// Run the reboot command; the daemon keeps serving until the system goes down.
async fn run_reboot(command: &str, restart: RestartType, args: [&str; 2]) {
    info!(command, ?args, ?restart, "requesting system restart");
    match tokio::process::Command::new(command).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(command, %status, "reboot command failed"),
        Err(e) => error!(command, error = %e, "cannot run reboot command"),
    }
}

/// Startup marker prefix written to log before anything else.
/// Full format: "--- ovld: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- ovld: starting (pid: ";

/// Write startup marker to log file (appends to existing log)
fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())?;

    Ok(())
}

/// Write startup error synchronously to log file.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
