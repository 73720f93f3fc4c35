// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage errors.

use crate::checkpoint::CheckpointError;
use crate::migration::MigrationError;
use ovl_core::{ChangeId, DataError, TaskId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("cannot checkpoint state: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("cannot read state: {0}")]
    Read(String),

    #[error("cannot migrate state: {0}")]
    Migration(#[from] MigrationError),

    #[error("no change with id {0}")]
    NoChange(ChangeId),

    #[error("no task with id {0}")]
    NoTask(TaskId),

    #[error("task {task} already belongs to change {change}")]
    TaskAlreadyLinked { task: TaskId, change: ChangeId },

    #[error("change {0} is not ready")]
    ChangeNotReady(ChangeId),

    #[error("invalid notice: {0}")]
    InvalidNotice(String),
}

impl StateError {
    /// The requested key is absent.
    pub fn is_no_state(&self) -> bool {
        matches!(self, StateError::Data(e) if e.is_no_state())
    }
}
