// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart requests from the engine.

use ovl_engine::{RestartHandler, RestartType};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Forwards restart requests to the daemon's main loop.
pub struct DaemonRestartHandler {
    tx: mpsc::UnboundedSender<RestartType>,
}

impl DaemonRestartHandler {
    pub fn new(tx: mpsc::UnboundedSender<RestartType>) -> Self {
        Self { tx }
    }
}

impl RestartHandler for DaemonRestartHandler {
    fn handle_restart(&self, restart: RestartType) {
        info!(?restart, "forwarding restart request");
        if self.tx.send(restart).is_err() {
            error!(?restart, "daemon loop gone, dropping restart request");
        }
    }
}

/// Arguments to the reboot command for a system restart.
pub fn reboot_args(restart: RestartType) -> Option<[&'static str; 2]> {
    match restart {
        RestartType::Daemon => None,
        RestartType::System => Some(["-r", "+1"]),
        RestartType::SystemNow => Some(["-r", "now"]),
        RestartType::SystemHaltNow => Some(["-H", "now"]),
        RestartType::SystemPoweroffNow => Some(["-P", "now"]),
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
