// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatches runnable tasks to the handlers registered for their kind.
//!
//! Each [`TaskRunner::ensure`] pass walks the linked tasks, starts every task
//! that is runnable (dependencies satisfied, not blocked, not scheduled for
//! later), and records the outcome when its handler finishes. Lock order is
//! always runner first, then state.

use crate::error::{EngineError, HandlerError};
use crate::handler::{BlockedFn, Handler, HandlerResult, TaskHandle, TaskPredicate};
use crate::overlord::StateManager;
use crate::restart;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ovl_core::{Clock, Status, SystemClock, TaskId};
use ovl_storage::{State, StateGuard, Task};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Clone)]
struct HandlerPair {
    run: Handler,
    undo: Option<Handler>,
}

struct OptionalHandler {
    matches: TaskPredicate,
    handlers: HandlerPair,
}

#[derive(Default)]
struct RunnerInner {
    handlers: HashMap<String, HandlerPair>,
    optional: Vec<OptionalHandler>,
    cleanups: HashMap<String, Handler>,
    blocked: Vec<BlockedFn>,
    /// Tasks whose handler (or cleanup) is executing.
    running: HashMap<TaskId, CancellationToken>,
    stopped: bool,
    some_blocked: bool,
    max_running: Option<usize>,
}

impl RunnerInner {
    fn handlers_for(&self, task: &Task) -> Option<&HandlerPair> {
        self.handlers.get(task.kind()).or_else(|| {
            self.optional
                .iter()
                .find(|o| (o.matches)(task))
                .map(|o| &o.handlers)
        })
    }
}

struct Shared {
    state: State,
    clock: Arc<dyn Clock>,
    inner: Mutex<RunnerInner>,
    idle: Notify,
    stop: CancellationToken,
}

/// Runs task handlers concurrently on the tokio runtime.
#[derive(Clone)]
pub struct TaskRunner {
    shared: Arc<Shared>,
}

impl TaskRunner {
    pub fn new(state: State) -> Self {
        Self::with_clock(state, Arc::new(SystemClock))
    }

    pub fn with_clock(state: State, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state,
                clock,
                inner: Mutex::new(RunnerInner::default()),
                idle: Notify::new(),
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Register the handlers for a task kind. Kinds without an undo handler
    /// are treated as done when asked to undo.
    pub fn add_handler(&self, kind: &str, run: Handler, undo: Option<Handler>) {
        self.shared
            .inner
            .lock()
            .handlers
            .insert(kind.to_string(), HandlerPair { run, undo });
    }

    /// Register handlers for tasks of any kind without regular handlers that
    /// match `matches`.
    pub fn add_optional_handler(&self, matches: TaskPredicate, run: Handler, undo: Option<Handler>) {
        self.shared.inner.lock().optional.push(OptionalHandler {
            matches,
            handlers: HandlerPair { run, undo },
        });
    }

    /// Register work run once per task after its change is ready.
    pub fn add_cleanup(&self, kind: &str, cleanup: Handler) {
        self.shared
            .inner
            .lock()
            .cleanups
            .insert(kind.to_string(), cleanup);
    }

    /// Add a predicate that holds a task back while it returns true.
    pub fn add_blocked(&self, blocked: BlockedFn) {
        self.shared.inner.lock().blocked.push(blocked);
    }

    /// Replace all blocked predicates.
    pub fn set_blocked(&self, blocked: Vec<BlockedFn>) {
        self.shared.inner.lock().blocked = blocked;
    }

    /// Bound the number of handlers executing at once.
    pub fn set_max_running(&self, max: Option<usize>) {
        self.shared.inner.lock().max_running = max;
    }

    /// Kinds with a registered handler, sorted.
    pub fn known_task_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.shared.inner.lock().handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Number of handlers currently executing.
    pub fn running_count(&self) -> usize {
        self.shared.inner.lock().running.len()
    }

    /// Start every runnable task and clean up finished ones.
    pub fn ensure(&self) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        if inner.stopped {
            return Ok(());
        }
        let rt = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut st = self.shared.state.lock();
        inner.some_blocked = false;
        let now = self.shared.clock.now();
        let mut next_at: Option<DateTime<Utc>> = None;

        let ids: Vec<TaskId> = st.tasks().map(|t| t.id().clone()).collect();
        for tid in ids {
            let Some(task) = st.task(&tid) else {
                continue;
            };
            let Some(pair) = inner.handlers_for(task).cloned() else {
                continue;
            };
            let mut status = task.status();

            if status.is_ready() {
                let needs_cleanup = !task.is_clean()
                    && !inner.running.contains_key(&tid)
                    && task.change().is_some_and(|c| st.is_change_ready(c));
                if needs_cleanup {
                    self.clean(&mut inner, &mut st, &tid, &rt);
                }
                continue;
            }
            if status == Status::Wait {
                continue;
            }
            if status == Status::Abort {
                if let Some(token) = inner.running.get(&tid) {
                    token.cancel();
                    continue;
                }
                try_undo(&inner, &mut st, &tid);
                status = st.task(&tid).map_or(Status::Hold, |t| t.status());
                if status.is_ready() {
                    continue;
                }
            }

            let Some(task) = st.task(&tid) else {
                continue;
            };
            if must_wait(&st, task) {
                continue;
            }

            if status == Status::Undo && pair.undo.is_none() {
                let has_waits = !task.wait_tasks().is_empty();
                if let Some(task) = st.task_mut(&tid) {
                    task.set_status(Status::Done);
                }
                if has_waits {
                    st.ensure_before(Duration::ZERO);
                }
                continue;
            }

            if inner.running.contains_key(&tid) {
                continue;
            }

            let running: Vec<&Task> = inner.running.keys().filter_map(|id| st.task(id)).collect();
            let blocked = inner.blocked.iter().any(|f| f(task, &running));
            let at_capacity = inner
                .max_running
                .is_some_and(|max| inner.running.len() >= max);
            if blocked || at_capacity {
                inner.some_blocked = true;
                continue;
            }

            if let Some(at) = task.at_time().filter(|at| *at > now) {
                next_at = Some(next_at.map_or(at, |n| n.min(at)));
                continue;
            }

            let run = match status {
                Status::Undo | Status::Undoing => pair.undo,
                _ => Some(pair.run),
            };
            if let Some(run) = run {
                self.start(&mut inner, &mut st, &tid, run, &rt);
            }
        }

        if let Some(at) = next_at {
            st.ensure_before((at - now).to_std().unwrap_or(Duration::ZERO));
        }
        let result = st.unlock();
        drop(inner);
        result.map_err(EngineError::from)
    }

    /// Stop starting tasks, cancel running handlers, and wait for them.
    pub async fn stop(&self) {
        self.shared.inner.lock().stopped = true;
        self.shared.stop.cancel();
        self.wait().await;
    }

    /// Wait until no handler is executing.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.inner.lock().running.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn start(
        &self,
        inner: &mut RunnerInner,
        st: &mut StateGuard<'_>,
        tid: &TaskId,
        run: Handler,
        rt: &Handle,
    ) {
        let Some(task) = st.task_mut(tid) else {
            return;
        };
        match task.status() {
            Status::Do => task.set_status(Status::Doing),
            Status::Undo => task.set_status(Status::Undoing),
            _ => {}
        }
        task.set_at(None);
        debug!(task_id = %tid, kind = task.kind(), status = %task.status(), "running task");

        let token = self.shared.stop.child_token();
        inner.running.insert(tid.clone(), token.clone());
        let handle = TaskHandle::new(self.shared.state.clone(), tid.clone());
        let runner = self.clone();
        let tid = tid.clone();
        let spawner = rt.clone();
        rt.spawn(async move {
            let result = run_guarded(&spawner, run, handle, token).await;
            runner.finish(&tid, result);
        });
    }

    fn clean(&self, inner: &mut RunnerInner, st: &mut StateGuard<'_>, tid: &TaskId, rt: &Handle) {
        let Some(task) = st.task(tid) else {
            return;
        };
        let Some(cleanup) = inner.cleanups.get(task.kind()).cloned() else {
            if let Err(e) = st.set_task_clean(tid) {
                warn!(task_id = %tid, error = %e, "cannot mark task clean");
            }
            return;
        };

        let token = self.shared.stop.child_token();
        inner.running.insert(tid.clone(), token.clone());
        let handle = TaskHandle::new(self.shared.state.clone(), tid.clone());
        let runner = self.clone();
        let tid = tid.clone();
        let spawner = rt.clone();
        rt.spawn(async move {
            let result = run_guarded(&spawner, cleanup, handle, token).await;
            runner.finish_cleanup(&tid, result);
        });
    }

    fn finish(&self, tid: &TaskId, result: HandlerResult) {
        let mut inner = self.shared.inner.lock();
        inner.running.remove(tid);
        let mut st = self.shared.state.lock();
        if inner.some_blocked {
            st.ensure_before(Duration::ZERO);
        }

        // Errors while stopping may be caused by the cancellation itself.
        let result = match result {
            Err(HandlerError::Failed(msg)) if inner.stopped => Err(HandlerError::Retry {
                after: None,
                reason: Some(msg),
            }),
            other => other,
        };

        if let Some(status) = st.task(tid).map(|t| t.status()) {
            match result {
                Ok(()) => complete(&mut st, tid, status),
                Err(HandlerError::Retry { after, reason }) => {
                    debug!(task_id = %tid, ?reason, ?after, "task will be retried");
                    if status == Status::Abort {
                        try_undo(&inner, &mut st, tid);
                    } else if let Some(after) = after {
                        let at = chrono::Duration::from_std(after)
                            .ok()
                            .and_then(|d| self.shared.clock.now().checked_add_signed(d));
                        if let Some(task) = st.task_mut(tid) {
                            task.set_at(at);
                        }
                        st.ensure_before(after);
                    }
                }
                Err(HandlerError::Failed(msg)) => fail(&mut st, tid, &msg),
            }
        } else {
            warn!(task_id = %tid, "finished task no longer exists");
        }

        // Cleanups run on the next ensure once the change is ready.
        let change_ready = st
            .task(tid)
            .and_then(|t| t.change())
            .is_some_and(|c| st.is_change_ready(c));
        if change_ready {
            st.ensure_before(Duration::ZERO);
        }

        if let Err(e) = st.unlock() {
            error!(task_id = %tid, error = %e, "cannot persist task outcome");
        }
        self.notify_if_idle(&inner);
    }

    fn finish_cleanup(&self, tid: &TaskId, result: HandlerResult) {
        let mut inner = self.shared.inner.lock();
        inner.running.remove(tid);
        match result {
            Ok(()) => {
                let mut st = self.shared.state.lock();
                if let Err(e) = st.set_task_clean(tid) {
                    warn!(task_id = %tid, error = %e, "cannot mark task clean");
                }
            }
            Err(e) => warn!(task_id = %tid, error = %e, "task cleanup failed, will retry"),
        }
        self.notify_if_idle(&inner);
    }

    fn notify_if_idle(&self, inner: &RunnerInner) {
        if inner.running.is_empty() {
            self.shared.idle.notify_waiters();
        }
    }
}

/// A task must wait while its prerequisites are unfinished: forward work
/// waits for its wait tasks to be done, undo waits for the tasks it halts to
/// be ready.
fn must_wait(st: &StateGuard<'_>, task: &Task) -> bool {
    match task.status() {
        Status::Do => task
            .wait_tasks()
            .iter()
            .filter_map(|id| st.task(id))
            .any(|t| t.status() != Status::Done),
        Status::Undo => task
            .halt_tasks()
            .iter()
            .filter_map(|id| st.task(id))
            .any(|t| !t.status().is_ready()),
        _ => false,
    }
}

/// Move an aborted task that is not running to `Undo`, or to `Hold` if its
/// kind cannot be undone.
fn try_undo(inner: &RunnerInner, st: &mut StateGuard<'_>, tid: &TaskId) {
    let Some(task) = st.task(tid) else {
        return;
    };
    if task.status() != Status::Abort {
        return;
    }
    let has_undo = inner.handlers_for(task).is_some_and(|h| h.undo.is_some());
    let has_waits = !task.wait_tasks().is_empty();
    let next = if has_undo { Status::Undo } else { Status::Hold };
    if let Some(task) = st.task_mut(tid) {
        task.set_status(next);
    }
    if has_undo || has_waits {
        st.ensure_before(Duration::ZERO);
    }
}

fn complete(st: &mut StateGuard<'_>, tid: &TaskId, status: Status) {
    let next = match status {
        Status::Doing => Some(Status::Done),
        Status::Undoing => Some(Status::Undone),
        Status::Abort => Some(Status::Undo),
        _ => None,
    };
    if let Some(next) = next {
        if !restart::park_if_boundary(st, tid, next) {
            if let Some(task) = st.task_mut(tid) {
                task.set_status(next);
            }
        }
    }

    let Some(task) = st.task(tid) else {
        return;
    };
    debug!(task_id = %tid, kind = task.kind(), status = %task.status(), "task handler finished");
    let wake = match task.status() {
        Status::Done => !task.halt_tasks().is_empty(),
        Status::Undone => !task.wait_tasks().is_empty(),
        Status::Undo => true,
        _ => false,
    };
    if wake {
        st.ensure_before(Duration::ZERO);
    }
}

fn fail(st: &mut StateGuard<'_>, tid: &TaskId, msg: &str) {
    let Some(task) = st.task(tid) else {
        return;
    };
    let change = task.change().cloned();
    let lanes = task.lanes();
    let kind = task.kind().to_string();
    if let Some(change) = &change {
        st.abort_lanes(change, &lanes);
    }
    if let Some(task) = st.task_mut(tid) {
        task.set_status(Status::Error);
        task.errorf(msg);
    }
    st.ensure_before(Duration::ZERO);
    error!(task_id = %tid, kind, error = msg, "task failed");
}

/// Run a handler in its own tokio task so a panic surfaces as an error.
async fn run_guarded(
    rt: &Handle,
    run: Handler,
    handle: TaskHandle,
    token: CancellationToken,
) -> HandlerResult {
    match rt.spawn(async move { run(handle, token).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HandlerError::Failed(format!(
            "handler panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(e) => Err(HandlerError::Failed(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait]
impl StateManager for TaskRunner {
    fn name(&self) -> &str {
        "taskrunner"
    }

    fn ensure(&self) -> Result<(), EngineError> {
        TaskRunner::ensure(self)
    }

    async fn stop(&self) {
        TaskRunner::stop(self).await
    }

    async fn wait(&self) {
        TaskRunner::wait(self).await
    }
}

#[cfg(test)]
#[path = "taskrunner_tests.rs"]
mod tests;
