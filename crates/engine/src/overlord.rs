// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The overlord owns the state and drives every manager from one ensure loop.
//!
//! Each pass calls [`StateManager::ensure`] on the registered managers in
//! registration order, with the task runner always last. Passes run every
//! `ensure_interval`, or earlier when anything calls `ensure_before`.

use crate::error::EngineError;
use crate::restart::{BootIdSource, MissedRebootPolicy, RestartHandler, RestartManager};
use crate::scheduler::Scheduler;
use crate::taskrunner::TaskRunner;
use async_trait::async_trait;
use ovl_core::{Clock, SystemClock};
use ovl_storage::{
    load_state, Backend, CheckpointError, Checkpointer, PruneLimits, PruneReport, RetryPolicy,
    State, StateData,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A subsystem driven by the ensure loop.
#[async_trait]
pub trait StateManager: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once before the loop starts.
    fn start_up(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called on every pass of the ensure loop.
    fn ensure(&self) -> Result<(), EngineError>;

    /// Stop any concurrent work the manager runs.
    async fn stop(&self) {}

    /// Wait for the manager's concurrent work to finish.
    async fn wait(&self) {}
}

/// Overlord configuration
#[derive(Debug, Clone)]
pub struct OverlordConfig {
    /// State file; `None` keeps the state in memory only.
    pub state_path: Option<PathBuf>,
    pub ensure_interval: Duration,
    pub prune_interval: Duration,
    pub prune_wait: Duration,
    pub abort_wait: Duration,
    pub max_ready_changes: usize,
    /// Upper bound on concurrently executing task handlers.
    pub max_running: Option<usize>,
    /// zstd level for the state file, `None` for plain JSON.
    pub compression_level: Option<i32>,
    pub checkpoint_retry: RetryPolicy,
    pub missed_reboot: MissedRebootPolicy,
}

impl Default for OverlordConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            ensure_interval: Duration::from_secs(5 * 60),
            prune_interval: Duration::from_secs(10 * 60),
            prune_wait: Duration::from_secs(24 * 60 * 60),
            abort_wait: Duration::from_secs(7 * 24 * 60 * 60),
            max_ready_changes: 500,
            max_running: None,
            compression_level: Some(3),
            checkpoint_retry: RetryPolicy::default(),
            missed_reboot: MissedRebootPolicy::default(),
        }
    }
}

impl OverlordConfig {
    fn prune_limits(&self) -> PruneLimits {
        PruneLimits {
            prune_wait: self.prune_wait,
            abort_wait: self.abort_wait,
            max_ready_changes: self.max_ready_changes,
        }
    }
}

/// Persists the state file and collects early-ensure requests.
pub struct OverlordBackend {
    checkpointer: Option<Checkpointer>,
    scheduler: Mutex<Scheduler>,
    wake: Notify,
}

impl OverlordBackend {
    fn new(checkpointer: Option<Checkpointer>) -> Self {
        Self {
            checkpointer,
            scheduler: Mutex::new(Scheduler::new()),
            wake: Notify::new(),
        }
    }

    /// Earliest requested ensure, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.lock().next_deadline()
    }
}

impl Backend for OverlordBackend {
    fn checkpoint(&self, data: &[u8]) -> Result<(), CheckpointError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };
        let result = checkpointer.checkpoint(data)?;
        debug!(size_bytes = result.size_bytes, "state checkpointed");
        Ok(())
    }

    fn ensure_before(&self, d: Duration) {
        if self.scheduler.lock().request(d, Instant::now()) {
            self.wake.notify_one();
        }
    }
}

struct Inner {
    config: OverlordConfig,
    state: State,
    backend: Arc<OverlordBackend>,
    runner: TaskRunner,
    restart: Arc<RestartManager>,
    managers: Mutex<Vec<Arc<dyn StateManager>>>,
    stop: CancellationToken,
}

impl Inner {
    /// Managers in call order, the task runner last.
    fn managers(&self) -> Vec<Arc<dyn StateManager>> {
        let mut all = self.managers.lock().clone();
        all.push(Arc::new(self.runner.clone()));
        all
    }

    fn ensure_once(&self) {
        self.backend.scheduler.lock().clear();
        for manager in self.managers() {
            if let Err(e) = manager.ensure() {
                error!(manager = manager.name(), error = %e, "state manager ensure failed");
            }
        }
    }

    fn prune(&self) -> PruneReport {
        let mut st = self.state.lock();
        let now = st.now();
        let report = st.prune(now, self.config.prune_limits());
        if let Err(e) = st.unlock() {
            error!(error = %e, "cannot persist pruned state");
        }
        if !report.aborted.is_empty()
            || !report.removed_changes.is_empty()
            || report.removed_notices > 0
        {
            info!(
                aborted = report.aborted.len(),
                removed_changes = report.removed_changes.len(),
                removed_tasks = report.removed_tasks,
                removed_notices = report.removed_notices,
                "pruned state"
            );
        }
        report
    }
}

/// Owner of the state, the managers and the ensure loop.
pub struct Overlord {
    inner: Arc<Inner>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Overlord {
    /// Load the state (or start fresh) and wire the restart manager and the
    /// task runner.
    pub fn new(
        config: OverlordConfig,
        restart_handler: Arc<dyn RestartHandler>,
        boot_ids: &dyn BootIdSource,
    ) -> Result<Self, EngineError> {
        Self::with_clock(config, restart_handler, boot_ids, Arc::new(SystemClock))
    }

    /// Like [`Overlord::new`], with every time stamped and compared by `clock`.
    pub fn with_clock(
        config: OverlordConfig,
        restart_handler: Arc<dyn RestartHandler>,
        boot_ids: &dyn BootIdSource,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let (data, checkpointer) = match &config.state_path {
            Some(path) => {
                let data = load_state(path)?;
                if data.is_none() {
                    info!(path = %path.display(), "no state file, starting fresh");
                }
                let checkpointer = Checkpointer::new(path.clone())
                    .with_compression_level(config.compression_level);
                (data.unwrap_or_default(), Some(checkpointer))
            }
            None => (StateData::new(), None),
        };

        let backend = Arc::new(OverlordBackend::new(checkpointer));
        let state = State::with_data(data, backend.clone(), config.checkpoint_retry);
        state.set_clock(Arc::clone(&clock));
        let runner = TaskRunner::with_clock(state.clone(), clock);
        runner.set_max_running(config.max_running);
        let restart = Arc::new(RestartManager::new(
            state.clone(),
            restart_handler,
            boot_ids,
            config.missed_reboot,
        )?);

        let managers: Vec<Arc<dyn StateManager>> = vec![restart.clone()];
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state,
                backend,
                runner,
                restart,
                managers: Mutex::new(managers),
                stop: CancellationToken::new(),
            }),
            loop_task: Mutex::new(None),
        })
    }

    /// Register a manager; it runs after those already registered and before
    /// the task runner.
    pub fn add_manager(&self, manager: Arc<dyn StateManager>) {
        self.inner.managers.lock().push(manager);
    }

    pub fn state(&self) -> &State {
        &self.inner.state
    }

    pub fn task_runner(&self) -> &TaskRunner {
        &self.inner.runner
    }

    pub fn restart_manager(&self) -> &Arc<RestartManager> {
        &self.inner.restart
    }

    /// Call every manager's `start_up` once, stopping at the first failure.
    pub fn start_up(&self) -> Result<(), EngineError> {
        for manager in self.inner.managers() {
            manager.start_up().map_err(|e| {
                error!(manager = manager.name(), error = %e, "state manager start-up failed");
                e
            })?;
        }
        Ok(())
    }

    /// Spawn the ensure loop on the current runtime.
    pub fn run(&self) {
        let mut loop_task = self.loop_task.lock();
        if loop_task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *loop_task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Run one ensure pass synchronously.
    pub fn ensure_once(&self) {
        self.inner.ensure_once();
    }

    /// Run one prune pass.
    pub fn prune(&self) -> PruneReport {
        self.inner.prune()
    }

    /// Request an ensure pass within `d`.
    pub fn ensure_before(&self, d: Duration) {
        self.inner.backend.ensure_before(d);
    }

    /// Run ensure passes until no early pass is requested, waiting for task
    /// handlers in between. Must not be combined with [`Overlord::run`].
    pub async fn settle(&self, timeout: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.inner.ensure_once();
            if tokio::time::timeout_at(deadline, self.inner.runner.wait())
                .await
                .is_err()
            {
                return Err(EngineError::SettleTimeout(timeout));
            }
            match self.inner.backend.next_deadline() {
                None => return Ok(()),
                Some(next) if next > deadline => return Err(EngineError::SettleTimeout(timeout)),
                Some(next) => tokio::time::sleep_until(next).await,
            }
        }
    }

    /// Stop the loop, then stop and wait for every manager.
    pub async fn stop(&self) {
        self.inner.stop.cancel();
        let task = self.loop_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "ensure loop ended abnormally");
            }
        }
        for manager in self.inner.managers() {
            manager.stop().await;
            manager.wait().await;
        }
        info!("overlord stopped");
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut prune_tick = tokio::time::interval(inner.config.prune_interval);
    prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval = ?inner.config.ensure_interval, "ensure loop started");

    loop {
        inner.ensure_once();
        let regular = Instant::now() + inner.config.ensure_interval;
        loop {
            let deadline = inner
                .backend
                .next_deadline()
                .map_or(regular, |next| next.min(regular));
            tokio::select! {
                _ = inner.stop.cancelled() => {
                    debug!("ensure loop stopping");
                    return;
                }
                // An early ensure was requested; recompute the deadline.
                _ = inner.backend.wake.notified() => {}
                _ = prune_tick.tick() => {
                    inner.prune();
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "overlord_tests.rs"]
mod tests;
