// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single unit of work inside a change.

use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, ClockHandle, DataBag, DataError, Status, TaskId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Only the most recent log entries are kept on a task.
pub const MAX_LOG_ENTRIES: usize = 10;

/// Progress report of a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub label: String,
    pub done: u64,
    pub total: u64,
}

/// A unit of work identified by kind, dispatched to the handler registered
/// for that kind.
///
/// Dependency edges are symmetric: if `a` waits for `b` then `b` halts `a`.
/// Edges are maintained by [`StateData::wait_for`](crate::StateData::wait_for)
/// so both sides always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) kind: String,
    pub(crate) summary: String,
    pub(crate) status: Status,
    #[serde(default, skip_serializing_if = "is_default_status")]
    pub(crate) waited_status: Status,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) clean: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "DataBag::is_empty")]
    pub(crate) data: DataBag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) wait_tasks: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) halt_tasks: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) lanes: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) change: Option<ChangeId>,
    pub(crate) spawn_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ready_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) at_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) clock: ClockHandle,
}

fn is_default_status(status: &Status) -> bool {
    *status == Status::Default
}

impl Task {
    pub(crate) fn new(id: TaskId, kind: &str, summary: &str, clock: ClockHandle) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            summary: summary.to_string(),
            status: Status::Do,
            waited_status: Status::Default,
            clean: false,
            progress: None,
            data: DataBag::new(),
            wait_tasks: Vec::new(),
            halt_tasks: Vec::new(),
            lanes: Vec::new(),
            log: Vec::new(),
            change: None,
            spawn_time: clock.now(),
            ready_time: None,
            at_time: None,
            clock,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Status the task returns to when released from [`Status::Wait`].
    pub fn waited_status(&self) -> Status {
        self.waited_status
    }

    /// Set the task status.
    ///
    /// Setting [`Status::Wait`] directly parks the task with `Done` as the
    /// status to restore; use [`Task::set_to_wait`] to choose another one.
    /// An aborted task ignores `Done` and `Wait` so its undo still runs.
    pub fn set_status(&mut self, status: Status) {
        if status == Status::Wait {
            self.set_to_wait(Status::Done);
            return;
        }
        if status == Status::Done && self.status == Status::Abort {
            return;
        }
        self.status = status;
        self.waited_status = Status::Default;
        self.ready_time = status.is_ready().then(|| self.clock.now());
    }

    /// Park the task until released, remembering the status to restore.
    pub fn set_to_wait(&mut self, waited: Status) {
        if self.status == Status::Abort {
            return;
        }
        self.status = Status::Wait;
        self.waited_status = match waited {
            Status::Default | Status::Wait => Status::Done,
            other => other,
        };
        self.ready_time = None;
    }

    /// Change this task belongs to, once linked.
    pub fn change(&self) -> Option<&ChangeId> {
        self.change.as_ref()
    }

    pub fn wait_tasks(&self) -> &[TaskId] {
        &self.wait_tasks
    }

    pub fn halt_tasks(&self) -> &[TaskId] {
        &self.halt_tasks
    }

    /// Lanes this task belongs to. A task that never joined a lane is in lane 0.
    pub fn lanes(&self) -> Vec<u32> {
        if self.lanes.is_empty() {
            vec![0]
        } else {
            self.lanes.clone()
        }
    }

    pub fn join_lane(&mut self, lane: u32) {
        if !self.lanes.contains(&lane) {
            self.lanes.push(lane);
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        self.data.get(key)
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), DataError> {
        self.data.set(key, value)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.has(key)
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Append an informational log entry.
    pub fn logf(&mut self, msg: impl AsRef<str>) {
        self.add_log("INFO", msg.as_ref());
    }

    /// Append an error log entry. Error entries feed [`crate::StateData::change_err`].
    pub fn errorf(&mut self, msg: impl AsRef<str>) {
        self.add_log("ERROR", msg.as_ref());
    }

    fn add_log(&mut self, level: &str, msg: &str) {
        let ts = self.clock.now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        self.log.push(format!("{ts} {level} {msg}"));
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            self.log.drain(..excess);
        }
    }

    /// Error messages recorded in the log, without timestamp and level.
    pub fn error_messages(&self) -> impl Iterator<Item = &str> {
        self.log.iter().filter_map(|entry| {
            let mut parts = entry.splitn(3, ' ');
            let _ts = parts.next()?;
            match parts.next()? {
                "ERROR" => parts.next(),
                _ => None,
            }
        })
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn set_progress(&mut self, label: &str, done: u64, total: u64) {
        self.progress = Some(Progress {
            label: label.to_string(),
            done,
            total,
        });
    }

    pub fn spawn_time(&self) -> DateTime<Utc> {
        self.spawn_time
    }

    pub fn ready_time(&self) -> Option<DateTime<Utc>> {
        self.ready_time
    }

    /// Earliest time the task may run again.
    pub fn at_time(&self) -> Option<DateTime<Utc>> {
        self.at_time
    }

    pub fn set_at(&mut self, at: Option<DateTime<Utc>>) {
        self.at_time = at;
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Override recorded timestamps.
    #[cfg(any(test, feature = "test-support"))]
    pub fn set_times_for_test(
        &mut self,
        spawn_time: DateTime<Utc>,
        ready_time: Option<DateTime<Utc>>,
    ) {
        self.spawn_time = spawn_time;
        self.ready_time = ready_time;
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
