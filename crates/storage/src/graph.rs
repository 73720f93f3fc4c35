// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Change-level views and operations over the task graph: aggregate status,
//! readiness, lanes, abort, and error reporting.

use crate::state::StateData;
use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, Status, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Order in which task statuses dominate the aggregate change status.
const STATUS_PRIORITY: [Status; 9] = [
    Status::Abort,
    Status::Undoing,
    Status::Undo,
    Status::Doing,
    Status::Do,
    Status::Error,
    Status::Undone,
    Status::Done,
    Status::Hold,
];

/// Failure summary of a change whose tasks ended in error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeError {
    /// `(task summary, error message)` pairs in task order.
    pub errors: Vec<(String, String)>,
}

impl fmt::Display for ChangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot perform the following tasks:")?;
        for (summary, msg) in &self.errors {
            write!(f, "\n- {summary} ({msg})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChangeError {}

impl StateData {
    /// Aggregate status of a change.
    ///
    /// An explicit status wins. A change without tasks is `Hold`. A change
    /// with parked tasks and nothing left to run is `Wait`. Otherwise the
    /// dominant task status is reported.
    pub fn change_status(&self, id: &ChangeId) -> Status {
        let Some(chg) = self.changes.get(id) else {
            return Status::Default;
        };
        if chg.status != Status::Default {
            return chg.status;
        }
        if chg.task_ids.is_empty() {
            return Status::Hold;
        }

        let mut counts: HashMap<Status, usize> = HashMap::new();
        for task in self.change_tasks(id) {
            *counts.entry(task.status).or_default() += 1;
        }
        let count = |s: Status| counts.get(&s).copied().unwrap_or(0);

        if count(Status::Wait) > 0 {
            let active = [
                Status::Abort,
                Status::Undoing,
                Status::Undo,
                Status::Doing,
                Status::Do,
            ]
            .into_iter()
            .map(count)
            .sum::<usize>();
            if active == 0 {
                return Status::Wait;
            }
        }

        STATUS_PRIORITY
            .into_iter()
            .find(|s| count(*s) > 0)
            .unwrap_or(Status::Wait)
    }

    /// A change is ready once its status is. A change that has no tasks and
    /// no explicit status is still being composed and is never ready.
    pub fn is_change_ready(&self, id: &ChangeId) -> bool {
        match self.changes.get(id) {
            Some(chg) if chg.task_ids.is_empty() && chg.status == Status::Default => false,
            Some(_) => self.change_status(id).is_ready(),
            None => false,
        }
    }

    /// All tasks of a ready change ran their cleanup.
    pub fn is_change_clean(&self, id: &ChangeId) -> bool {
        self.is_change_ready(id) && self.change_tasks(id).iter().all(|t| t.clean)
    }

    /// When the change became ready, or `None` while it is still running.
    pub fn change_ready_time(&self, id: &ChangeId) -> Option<DateTime<Utc>> {
        let chg = self.changes.get(id)?;
        if !self.is_change_ready(id) {
            return None;
        }
        chg.ready_time.or_else(|| {
            self.change_tasks(id)
                .iter()
                .filter_map(|t| t.ready_time)
                .max()
        })
    }

    /// Error report of a change in `Error` status.
    pub fn change_err(&self, id: &ChangeId) -> Option<ChangeError> {
        if self.change_status(id) != Status::Error {
            return None;
        }
        let mut errors = Vec::new();
        for task in self.change_tasks(id) {
            if task.status != Status::Error {
                continue;
            }
            let before = errors.len();
            for msg in task.error_messages() {
                errors.push((task.summary.clone(), msg.to_string()));
            }
            if errors.len() == before {
                errors.push((task.summary.clone(), "unknown error".to_string()));
            }
        }
        Some(ChangeError { errors })
    }

    /// Ids of the change's tasks that belong to any of `lanes`.
    pub fn lane_tasks(&self, id: &ChangeId, lanes: &[u32]) -> Vec<TaskId> {
        self.change_tasks(id)
            .into_iter()
            .filter(|t| t.lanes().iter().any(|l| lanes.contains(l)))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Abort every task of the change: pending work is held, running work is
    /// aborted, and completed or parked work is undone.
    pub fn abort_change(&mut self, id: &ChangeId) {
        let task_ids = match self.changes.get(id) {
            Some(chg) => chg.task_ids.clone(),
            None => return,
        };
        self.touch();
        for tid in task_ids {
            if let Some(task) = self.tasks.get_mut(&tid) {
                abort_task_status(task);
            }
        }
    }

    /// Abort the tasks in `lanes`, following halt edges to dependent tasks
    /// and extending to other lanes left with no live work.
    pub fn abort_lanes(&mut self, id: &ChangeId, lanes: &[u32]) {
        if !self.changes.contains_key(id) {
            return;
        }
        self.touch();
        let mut aborted_lanes: HashSet<u32> = HashSet::new();
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut pending: Vec<u32> = lanes.to_vec();
        while !pending.is_empty() {
            pending = self.abort_lanes_round(id, &pending, &mut aborted_lanes, &mut seen);
        }
    }

    fn abort_lanes_round(
        &mut self,
        id: &ChangeId,
        lanes: &[u32],
        aborted_lanes: &mut HashSet<u32>,
        seen: &mut HashSet<TaskId>,
    ) -> Vec<u32> {
        let mut has_live: HashSet<u32> = HashSet::new();
        let mut queue: VecDeque<TaskId> = VecDeque::new();
        for task in self.change_tasks(id) {
            let task_lanes = task.lanes();
            if task_lanes.iter().any(|l| lanes.contains(l)) {
                queue.push_back(task.id.clone());
                continue;
            }
            if matches!(task.status, Status::Do | Status::Doing | Status::Done) {
                has_live.extend(task_lanes);
            }
        }
        aborted_lanes.extend(lanes.iter().copied());

        let mut next = Vec::new();
        while let Some(tid) = queue.pop_front() {
            if !seen.insert(tid.clone()) {
                continue;
            }
            let Some(task) = self.tasks.get_mut(&tid) else {
                continue;
            };
            abort_task_status(task);
            for lane in task.lanes() {
                if !aborted_lanes.contains(&lane) && !has_live.contains(&lane) {
                    aborted_lanes.insert(lane);
                    next.push(lane);
                }
            }
            for halted in &task.halt_tasks {
                if !seen.contains(halted) {
                    queue.push_back(halted.clone());
                }
            }
        }
        next
    }
}

fn abort_task_status(task: &mut crate::Task) {
    match task.status {
        Status::Do => task.set_status(Status::Hold),
        Status::Doing => task.set_status(Status::Abort),
        Status::Done | Status::Wait => task.set_status(Status::Undo),
        _ => {}
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
