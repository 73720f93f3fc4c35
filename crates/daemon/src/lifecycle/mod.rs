// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup and shutdown.

mod restart;
pub(crate) use restart::{reboot_args, DaemonRestartHandler};

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use ovl_engine::{EngineError, KernelBootId, Overlord, OverlordConfig, RestartType};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/ovl)
    pub state_dir: PathBuf,
    /// Path to the state document
    pub state_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Command run for system restarts
    pub reboot_command: String,
    pub overlord: OverlordConfig,
}

impl Config {
    /// Load configuration for the daemon.
    ///
    /// Uses fixed paths under `~/.local/state/ovl/` (or `$XDG_STATE_HOME/ovl/`).
    pub fn load() -> Result<Self, LifecycleError> {
        let mut config = Self::in_dir(crate::env::state_dir()?);
        if let Some(interval) = crate::env::ensure_interval() {
            config.overlord.ensure_interval = interval;
        }
        config.overlord.max_running = crate::env::max_running();
        config.reboot_command = crate::env::reboot_command();
        Ok(config)
    }

    /// Default configuration rooted at `state_dir`.
    pub fn in_dir(state_dir: PathBuf) -> Self {
        let state_path = state_dir.join("state.json");
        Self {
            lock_path: state_dir.join("ovld.pid"),
            log_path: state_dir.join("ovld.log"),
            reboot_command: "shutdown".to_string(),
            overlord: OverlordConfig {
                state_path: Some(state_path.clone()),
                ..OverlordConfig::default()
            },
            state_path,
            state_dir,
        }
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub overlord: Overlord,
    /// Restart requests raised by the engine
    pub restarts: mpsc::UnboundedReceiver<RestartType>,
}

impl DaemonState {
    /// Stop the engine and remove the PID file.
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");
        self.overlord.stop().await;

        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        // Lock file is released when self.lock_file is dropped
        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // The files belong to the running daemon when the lock is held.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Open without truncating so a running daemon's PID survives.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    write_pid(&lock_file)?;

    let (tx, restarts) = mpsc::unbounded_channel();
    let overlord = Overlord::new(
        config.overlord.clone(),
        Arc::new(DaemonRestartHandler::new(tx)),
        &KernelBootId::new(),
    )?;
    info!(path = %config.state_path.display(), "state loaded");

    overlord.start_up()?;
    if let Err(e) = overlord.restart_manager().check_rebooted() {
        warn!(error = %e, policy = ?config.overlord.missed_reboot, "restart check failed");
    }
    overlord.run();

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        overlord,
        restarts,
    })
}

fn write_pid(lock_file: &File) -> Result<(), LifecycleError> {
    use std::io::Write;
    lock_file.set_len(0)?;
    let mut f = lock_file;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

/// Clean up the PID file after a failed startup
fn cleanup_on_failure(config: &Config) {
    remove_if_exists(&config.lock_path);
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
#[path = "../lifecycle_tests.rs"]
mod tests;
