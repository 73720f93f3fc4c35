// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: OVL_STATE_DIR > XDG_STATE_HOME/ovl > ~/.local/state/ovl
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("OVL_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("ovl"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/ovl"))
}

/// Ensure interval override
pub fn ensure_interval() -> Option<Duration> {
    std::env::var("OVL_ENSURE_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Bound on concurrently running task handlers
pub fn max_running() -> Option<usize> {
    std::env::var("OVL_MAX_RUNNING")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Command invoked for system restarts
pub fn reboot_command() -> String {
    std::env::var("OVL_REBOOT_COMMAND").unwrap_or_else(|_| "shutdown".to_string())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
