// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use crate::restart::RestartError;
use ovl_core::DataError;
use ovl_storage::StateError;
use std::time::Duration;
use thiserror::Error;

/// Errors from managers, the task runner, and the overlord loop
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{manager}: {message}")]
    Manager { manager: String, message: String },
    #[error("task runner requires a tokio runtime")]
    NoRuntime,
    #[error("settle did not converge within {0:?}")]
    SettleTimeout(Duration),
    #[error(transparent)]
    Restart(#[from] RestartError),
}

/// Outcome of a failed or postponed handler run.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Not a failure: run the handler again, no earlier than `after`.
    #[error("task should be retried{}", reason_suffix(.reason))]
    Retry {
        after: Option<Duration>,
        reason: Option<String>,
    },
    #[error("{0}")]
    Failed(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl HandlerError {
    pub fn retry() -> Self {
        HandlerError::Retry {
            after: None,
            reason: None,
        }
    }

    pub fn retry_after(after: Duration) -> Self {
        HandlerError::Retry {
            after: Some(after),
            reason: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

impl From<StateError> for HandlerError {
    fn from(e: StateError) -> Self {
        HandlerError::Failed(e.to_string())
    }
}

impl From<DataError> for HandlerError {
    fn from(e: DataError) -> Self {
        HandlerError::Failed(e.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        HandlerError::Failed(e.to_string())
    }
}

impl From<RestartError> for HandlerError {
    fn from(e: RestartError) -> Self {
        HandlerError::Failed(e.to_string())
    }
}
