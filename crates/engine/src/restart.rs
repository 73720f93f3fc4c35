// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination of daemon and system restarts with in-flight tasks.
//!
//! A task that needs the system to reboot before its change can continue
//! finishes through [`RestartManager::finish_task_with_restart`]. The current
//! boot id is recorded in the state and affected tasks are parked in
//! [`Status::Wait`]. On the next start-up the recorded boot id is compared to
//! the current one: a different id releases the parked tasks, the same id
//! means the requested reboot did not happen.

use crate::error::EngineError;
use crate::overlord::StateManager;
use async_trait::async_trait;
use ovl_core::{ChangeId, DataError, Status, TaskId};
use ovl_storage::{State, StateError, StateGuard, Task};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// State key holding the [`RestartRecord`] of a pending system restart.
pub const SYSTEM_RESTART_KEY: &str = "system-restart";
/// Task key holding the boot id a parked task waits to see change.
pub const TASK_BOOT_ID_KEY: &str = "restart-boot-id";
/// Change key set while the change waits for a system restart.
pub const CHANGE_WAITING_KEY: &str = "waiting-for-restart";
/// Task key marking a restart boundary.
pub const RESTART_BOUNDARY_KEY: &str = "restart-boundary";

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("cannot read boot id: {0}")]
    BootId(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("no task with id {0}")]
    NoTask(TaskId),
    #[error("requested system restart did not happen (boot id {boot_id})")]
    RebootDidNotHappen { boot_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartType {
    /// Restart only the daemon process.
    Daemon,
    /// Reboot after a grace delay.
    System,
    /// Reboot immediately.
    SystemNow,
    /// Halt immediately.
    SystemHaltNow,
    /// Power off immediately.
    SystemPoweroffNow,
}

impl RestartType {
    pub fn is_system(self) -> bool {
        !matches!(self, RestartType::Daemon)
    }
}

/// Which direction of a task's execution must not proceed past a pending
/// system restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartBoundary {
    Do,
    Undo,
    Both,
}

/// Pending system restart, persisted across the reboot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RestartRecord {
    pub boot_id: String,
    pub restart_type: RestartType,
}

/// What to do when the boot id is unchanged after a requested system restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedRebootPolicy {
    /// Ask for the same restart again and keep tasks parked.
    #[default]
    Rerequest,
    /// Fail the parked tasks and abort their lanes.
    Fail,
}

/// Outcome of comparing boot ids at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootObservation {
    NoPendingRestart,
    Rebooted,
    RebootDidNotHappen,
}

/// Performs the side effects of a restart request.
pub trait RestartHandler: Send + Sync + 'static {
    fn handle_restart(&self, restart: RestartType);
}

/// Source of the identifier of the current boot.
pub trait BootIdSource: Send + Sync + 'static {
    fn boot_id(&self) -> Result<String, RestartError>;
}

/// Reads the kernel boot id, falling back to a per-process id where the
/// kernel does not expose one.
#[derive(Debug, Clone)]
pub struct KernelBootId {
    path: PathBuf,
}

impl KernelBootId {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(BOOT_ID_PATH),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for KernelBootId {
    fn default() -> Self {
        Self::new()
    }
}

impl BootIdSource for KernelBootId {
    fn boot_id(&self) -> Result<String, RestartError> {
        match std::fs::read_to_string(&self.path) {
            Ok(id) => Ok(id.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                static FALLBACK: std::sync::OnceLock<String> = std::sync::OnceLock::new();
                warn!(path = %self.path.display(), "no kernel boot id, using a per-process id");
                Ok(FALLBACK
                    .get_or_init(|| uuid::Uuid::new_v4().to_string())
                    .clone())
            }
            Err(e) => Err(RestartError::BootId(e.to_string())),
        }
    }
}

/// Mark `task` as a restart boundary.
pub fn mark_restart_boundary(task: &mut Task, boundary: RestartBoundary) -> Result<(), DataError> {
    task.set(RESTART_BOUNDARY_KEY, &boundary)
}

/// Whether `task` is a boundary for the direction that ends in `status`.
pub fn is_restart_boundary(task: &Task, status: Status) -> bool {
    let Ok(boundary) = task.get::<RestartBoundary>(RESTART_BOUNDARY_KEY) else {
        return false;
    };
    matches!(
        (boundary, status),
        (RestartBoundary::Both, _)
            | (RestartBoundary::Do, Status::Done)
            | (RestartBoundary::Undo, Status::Undone)
    )
}

fn change_waiting(st: &StateGuard<'_>, change: &ChangeId) -> bool {
    st.change(change)
        .is_some_and(|c| c.get::<bool>(CHANGE_WAITING_KEY).unwrap_or(false))
}

/// Park a boundary task that finishes into `status` while its change waits
/// for a system restart. Returns whether the task was parked.
pub(crate) fn park_if_boundary(st: &mut StateGuard<'_>, tid: &TaskId, status: Status) -> bool {
    if !matches!(status, Status::Done | Status::Undone) {
        return false;
    }
    let Some(task) = st.task(tid) else {
        return false;
    };
    let waiting = task.change().is_some_and(|c| change_waiting(st, c));
    if !waiting || !is_restart_boundary(task, status) {
        return false;
    }
    let boot_id = match st.get::<RestartRecord>(SYSTEM_RESTART_KEY) {
        Ok(record) => record.boot_id,
        Err(_) => return false,
    };
    let Some(task) = st.task_mut(tid) else {
        return false;
    };
    task.set_to_wait(status);
    if let Err(e) = task.set(TASK_BOOT_ID_KEY, &boot_id) {
        warn!(task_id = %tid, error = %e, "cannot record restart marker");
    }
    info!(task_id = %tid, waited = %status, "task parked at restart boundary");
    true
}

/// Tracks restart requests and reconciles parked tasks across reboots.
pub struct RestartManager {
    state: State,
    handler: Arc<dyn RestartHandler>,
    boot_id: String,
    policy: MissedRebootPolicy,
    requested: Mutex<Option<RestartType>>,
    observation: Mutex<Option<BootObservation>>,
}

impl RestartManager {
    pub fn new(
        state: State,
        handler: Arc<dyn RestartHandler>,
        boot_ids: &dyn BootIdSource,
        policy: MissedRebootPolicy,
    ) -> Result<Self, RestartError> {
        Ok(Self {
            state,
            handler,
            boot_id: boot_ids.boot_id()?,
            policy,
            requested: Mutex::new(None),
            observation: Mutex::new(None),
        })
    }

    pub fn boot_id(&self) -> &str {
        &self.boot_id
    }

    /// Restart requested since start-up, if any.
    pub fn restart_pending(&self) -> Option<RestartType> {
        *self.requested.lock()
    }

    /// Result of the boot id comparison made at start-up.
    pub fn observation(&self) -> Option<BootObservation> {
        *self.observation.lock()
    }

    /// Fail if start-up found that a requested system restart did not happen.
    pub fn check_rebooted(&self) -> Result<(), RestartError> {
        match self.observation() {
            Some(BootObservation::RebootDidNotHappen) => Err(RestartError::RebootDidNotHappen {
                boot_id: self.boot_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Request a restart and hand it to the restart handler.
    pub fn request_restart(&self, restart: RestartType) {
        info!(?restart, "restart requested");
        *self.requested.lock() = Some(restart);
        self.handler.handle_restart(restart);
    }

    /// Finish `task` with `status`, then request `restart`.
    ///
    /// For system restarts the task (if it is a boundary or nothing in its
    /// lane depends on it) or its pending dependents in the same lane are
    /// parked until the system has rebooted. Must be called with the state
    /// locked.
    pub fn finish_task_with_restart(
        &self,
        st: &mut StateGuard<'_>,
        tid: &TaskId,
        status: Status,
        restart: RestartType,
    ) -> Result<(), RestartError> {
        let task = st.task(tid).ok_or_else(|| RestartError::NoTask(tid.clone()))?;
        let change = task.change().cloned();
        let boundary = is_restart_boundary(task, status);
        let lanes = task.lanes();
        let dependents: Vec<TaskId> = task
            .halt_tasks()
            .iter()
            .filter(|id| {
                st.task(id).is_some_and(|t| {
                    t.status() == Status::Do && t.lanes().iter().any(|l| lanes.contains(l))
                })
            })
            .cloned()
            .collect();

        if !restart.is_system() {
            if let Some(task) = st.task_mut(tid) {
                task.set_status(status);
            }
            self.request_restart(restart);
            return Ok(());
        }

        st.set(
            SYSTEM_RESTART_KEY,
            &RestartRecord {
                boot_id: self.boot_id.clone(),
                restart_type: restart,
            },
        )?;
        if let Some(change) = &change {
            if let Some(chg) = st.change_mut(change) {
                chg.set(CHANGE_WAITING_KEY, &true)?;
            }
        }

        let park_self = boundary || dependents.is_empty();

        if park_self {
            if let Some(task) = st.task_mut(tid) {
                task.set_to_wait(status);
                task.set(TASK_BOOT_ID_KEY, &self.boot_id)?;
            }
        } else {
            if let Some(task) = st.task_mut(tid) {
                task.set_status(status);
            }
            for dep in &dependents {
                if let Some(task) = st.task_mut(dep) {
                    task.set_to_wait(Status::Do);
                    task.set(TASK_BOOT_ID_KEY, &self.boot_id)?;
                }
            }
        }
        info!(task_id = %tid, ?restart, parked_self = park_self, "task waits for system restart");

        self.request_restart(restart);
        Ok(())
    }

    /// Compare the recorded boot id with the current one and act on it.
    fn observe_boot(&self) -> Result<BootObservation, RestartError> {
        let mut st = self.state.lock();
        let record = match st.get::<RestartRecord>(SYSTEM_RESTART_KEY) {
            Ok(record) => record,
            Err(e) if e.is_no_state() => return Ok(BootObservation::NoPendingRestart),
            Err(e) => return Err(e.into()),
        };

        if record.boot_id != self.boot_id {
            info!(previous = %record.boot_id, current = %self.boot_id, "system restarted as requested");
            st.remove(SYSTEM_RESTART_KEY);
            for tid in take_parked(&mut st) {
                if let Some(task) = st.task_mut(&tid) {
                    let waited = task.waited_status();
                    task.set_status(waited);
                }
            }
            st.ensure_before(Duration::ZERO);
            st.unlock()?;
            return Ok(BootObservation::Rebooted);
        }

        warn!(boot_id = %self.boot_id, policy = ?self.policy, "requested system restart did not happen");
        match self.policy {
            MissedRebootPolicy::Rerequest => {
                drop(st);
                self.request_restart(record.restart_type);
            }
            MissedRebootPolicy::Fail => {
                st.remove(SYSTEM_RESTART_KEY);
                for tid in take_parked(&mut st) {
                    let Some(task) = st.task(&tid) else {
                        continue;
                    };
                    let change = task.change().cloned();
                    let lanes = task.lanes();
                    if let Some(change) = &change {
                        st.abort_lanes(change, &lanes);
                    }
                    if let Some(task) = st.task_mut(&tid) {
                        task.set_status(Status::Error);
                        task.errorf("system restart did not happen");
                    }
                }
                st.ensure_before(Duration::ZERO);
                st.unlock()?;
            }
        }
        Ok(BootObservation::RebootDidNotHappen)
    }
}

/// Clear restart markers, returning the tasks that were parked.
fn take_parked(st: &mut StateGuard<'_>) -> Vec<TaskId> {
    let waiting: Vec<ChangeId> = st
        .changes()
        .filter(|c| c.has(CHANGE_WAITING_KEY))
        .map(|c| c.id().clone())
        .collect();
    let mut parked = Vec::new();
    for change in waiting {
        if let Some(chg) = st.change_mut(&change) {
            chg.remove(CHANGE_WAITING_KEY);
        }
        let ids: Vec<TaskId> = st
            .change_tasks(&change)
            .iter()
            .filter(|t| t.has(TASK_BOOT_ID_KEY))
            .map(|t| t.id().clone())
            .collect();
        for tid in ids {
            if let Some(task) = st.task_mut(&tid) {
                task.remove(TASK_BOOT_ID_KEY);
                if task.status() == Status::Wait {
                    parked.push(tid);
                }
            }
        }
    }
    parked
}

#[async_trait]
impl StateManager for RestartManager {
    fn name(&self) -> &str {
        "restart"
    }

    fn start_up(&self) -> Result<(), EngineError> {
        let observation = self.observe_boot()?;
        *self.observation.lock() = Some(observation);
        Ok(())
    }

    fn ensure(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
