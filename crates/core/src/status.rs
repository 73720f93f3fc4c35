// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task and change status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task, or the aggregate status of a change.
///
/// `Default` only appears on a change, meaning "derive from tasks".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Default,
    /// Waiting to run forward.
    Do,
    /// Forward handler running.
    Doing,
    /// Forward work completed.
    Done,
    /// Running forward handler must stop; undo follows.
    Abort,
    /// Waiting to run the undo handler.
    Undo,
    /// Undo handler running.
    Undoing,
    /// Undo completed.
    Undone,
    /// Will not run because the change was aborted or a dependency failed.
    Hold,
    /// Handler failed.
    Error,
    /// Parked until an external event (e.g. a system restart) releases it.
    Wait,
}

impl Status {
    /// Ready statuses are terminal for the current run.
    pub fn is_ready(self) -> bool {
        matches!(self, Status::Done | Status::Undone | Status::Hold | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Default => "Default",
            Status::Do => "Do",
            Status::Doing => "Doing",
            Status::Done => "Done",
            Status::Abort => "Abort",
            Status::Undo => "Undo",
            Status::Undoing => "Undoing",
            Status::Undone => "Undone",
            Status::Hold => "Hold",
            Status::Error => "Error",
            Status::Wait => "Wait",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
