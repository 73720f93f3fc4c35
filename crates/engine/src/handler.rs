// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler contract between the task runner and task kinds.

use crate::error::HandlerError;
use ovl_core::TaskId;
use ovl_storage::{State, Task};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type HandlerResult = Result<(), HandlerError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Asynchronous work for one task.
///
/// The token is cancelled when the task is aborted or the runner stops; a
/// handler should return promptly once it fires. Returning `Ok(())` lets the
/// runner advance the status, unless the handler already moved the task to a
/// final status itself.
pub type Handler = Arc<dyn Fn(TaskHandle, CancellationToken) -> HandlerFuture + Send + Sync>;

/// Decides whether a task may start given the tasks currently running.
pub type BlockedFn = Arc<dyn Fn(&Task, &[&Task]) -> bool + Send + Sync>;

/// Selects tasks served by an optional handler.
pub type TaskPredicate = Arc<dyn Fn(&Task) -> bool + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(TaskHandle, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |task, cancel| Box::pin(f(task, cancel)))
}

/// The task a handler runs for, with access to the shared state.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: State,
    id: TaskId,
}

impl TaskHandle {
    pub fn new(state: State, id: TaskId) -> Self {
        Self { state, id }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Run `f` on the task under the state lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Task) -> R) -> Result<R, HandlerError> {
        let mut st = self.state.lock();
        let task = st
            .task_mut(&self.id)
            .ok_or_else(|| HandlerError::failed(format!("task {} vanished", self.id)))?;
        let out = f(task);
        st.unlock()?;
        Ok(out)
    }
}
