// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state document: keyed data, changes, tasks, notices, and id counters.
//!
//! `StateData` is only reachable through a [`StateGuard`](crate::StateGuard),
//! so every read and write happens under the state lock. Mutating accessors
//! mark the document modified; the guard persists modified documents when it
//! is released.

use crate::change::Change;
use crate::error::StateError;
use crate::notices::Notice;
use crate::task::Task;
use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, Clock, ClockHandle, DataBag, Status, TaskId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Current on-disk format version of the state document.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

fn current_version() -> u32 {
    CURRENT_FORMAT_VERSION
}

type CacheEntry = Arc<dyn Any + Send + Sync>;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateData {
    #[serde(rename = "v", default = "current_version")]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) data: DataBag,
    #[serde(default)]
    pub(crate) changes: BTreeMap<ChangeId, Change>,
    #[serde(default)]
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    #[serde(default)]
    pub(crate) last_change_id: u64,
    #[serde(default)]
    pub(crate) last_task_id: u64,
    #[serde(default)]
    pub(crate) last_lane_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) notices: Vec<Notice>,
    #[serde(default)]
    pub(crate) last_notice_id: u64,
    #[serde(skip)]
    pub(crate) modified: bool,
    /// Change statuses already announced with a change-update notice.
    #[serde(skip)]
    pub(crate) reported: HashMap<ChangeId, Status>,
    #[serde(skip)]
    cache: HashMap<String, CacheEntry>,
    #[serde(skip)]
    clock: ClockHandle,
}

impl fmt::Debug for StateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateData")
            .field("changes", &self.changes.len())
            .field("tasks", &self.tasks.len())
            .field("last_change_id", &self.last_change_id)
            .field("last_task_id", &self.last_task_id)
            .field("last_lane_id", &self.last_lane_id)
            .field("notices", &self.notices.len())
            .field("modified", &self.modified)
            .finish()
    }
}

impl Default for StateData {
    fn default() -> Self {
        Self::new()
    }
}

impl StateData {
    pub fn new() -> Self {
        Self {
            version: CURRENT_FORMAT_VERSION,
            data: DataBag::new(),
            changes: BTreeMap::new(),
            tasks: BTreeMap::new(),
            last_change_id: 0,
            last_task_id: 0,
            last_lane_id: 0,
            notices: Vec::new(),
            last_notice_id: 0,
            modified: false,
            reported: HashMap::new(),
            cache: HashMap::new(),
            clock: ClockHandle::default(),
        }
    }

    /// Use `clock` for spawn, ready, and log times from now on.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = ClockHandle::new(clock);
        for task in self.tasks.values_mut() {
            task.clock = self.clock.clone();
        }
        for chg in self.changes.values_mut() {
            chg.clock = self.clock.clone();
        }
    }

    /// Current time according to the document's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Encode the document as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(|e| StateError::Read(e.to_string()))
    }

    /// Whether the document changed since it was last persisted.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn touch(&mut self) {
        self.modified = true;
    }

    /// Called once a modified document was made durable.
    pub(crate) fn persisted(&mut self) {
        self.modified = false;
        self.cache.clear();
    }

    // ── keyed data ────────────────────────────────────────────────────────

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        Ok(self.data.get(key)?)
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        self.touch();
        Ok(self.data.set(key, value)?)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.touch();
        self.data.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.has(key)
    }

    // ── in-memory cache (never persisted) ─────────────────────────────────

    pub fn cache<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.cache.insert(key.to_string(), Arc::new(value));
    }

    pub fn cached<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.cache.get(key).cloned()?.downcast::<T>().ok()
    }

    pub fn uncache(&mut self, key: &str) {
        self.cache.remove(key);
    }

    // ── changes and tasks ─────────────────────────────────────────────────

    pub fn new_change(&mut self, kind: &str, summary: &str) -> ChangeId {
        self.touch();
        self.last_change_id += 1;
        let id = ChangeId::from_seq(self.last_change_id);
        let change = Change::new(id.clone(), kind, summary, self.clock.clone());
        self.changes.insert(id.clone(), change);
        id
    }

    /// Create a task that is not yet part of any change.
    pub fn new_task(&mut self, kind: &str, summary: &str) -> TaskId {
        self.touch();
        self.last_task_id += 1;
        let id = TaskId::from_seq(self.last_task_id);
        let task = Task::new(id.clone(), kind, summary, self.clock.clone());
        self.tasks.insert(id.clone(), task);
        id
    }

    /// Allocate a new lane number, starting at 1.
    pub fn new_lane(&mut self) -> u32 {
        self.touch();
        self.last_lane_id += 1;
        self.last_lane_id
    }

    pub fn change(&self, id: &ChangeId) -> Option<&Change> {
        self.changes.get(id)
    }

    pub fn change_mut(&mut self, id: &ChangeId) -> Option<&mut Change> {
        self.touch();
        self.changes.get_mut(id)
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    /// Look up a task, linked or not.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.touch();
        self.tasks.get_mut(id)
    }

    pub(crate) fn require_task(&self, id: &TaskId) -> Result<&Task, StateError> {
        self.tasks
            .get(id)
            .ok_or_else(|| StateError::NoTask(id.clone()))
    }

    pub(crate) fn require_change(&self, id: &ChangeId) -> Result<&Change, StateError> {
        self.changes
            .get(id)
            .ok_or_else(|| StateError::NoChange(id.clone()))
    }

    /// Tasks that belong to a change, in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(|t| t.change.is_some())
    }

    /// Tasks of a change, in insertion order.
    pub fn change_tasks(&self, id: &ChangeId) -> Vec<&Task> {
        self.changes
            .get(id)
            .map(|chg| {
                chg.task_ids
                    .iter()
                    .filter_map(|tid| self.tasks.get(tid))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Link a task into a change. A task can belong to one change only.
    pub fn add_task(&mut self, change: &ChangeId, task: &TaskId) -> Result<(), StateError> {
        self.require_change(change)?;
        match &self.require_task(task)?.change {
            Some(owner) if owner == change => return Ok(()),
            Some(owner) => {
                return Err(StateError::TaskAlreadyLinked {
                    task: task.clone(),
                    change: owner.clone(),
                })
            }
            None => {}
        }
        self.touch();
        if let Some(t) = self.tasks.get_mut(task) {
            t.change = Some(change.clone());
        }
        if let Some(chg) = self.changes.get_mut(change) {
            chg.task_ids.push(task.clone());
        }
        Ok(())
    }

    pub fn add_all(&mut self, change: &ChangeId, tasks: &[TaskId]) -> Result<(), StateError> {
        for task in tasks {
            self.add_task(change, task)?;
        }
        Ok(())
    }

    /// Make `task` wait for `dependency`, recording the edge on both sides.
    pub fn wait_for(&mut self, task: &TaskId, dependency: &TaskId) -> Result<(), StateError> {
        self.require_task(task)?;
        self.require_task(dependency)?;
        self.touch();
        if let Some(t) = self.tasks.get_mut(task) {
            if !t.wait_tasks.contains(dependency) {
                t.wait_tasks.push(dependency.clone());
            }
        }
        if let Some(d) = self.tasks.get_mut(dependency) {
            if !d.halt_tasks.contains(task) {
                d.halt_tasks.push(task.clone());
            }
        }
        Ok(())
    }

    pub fn wait_all(&mut self, task: &TaskId, dependencies: &[TaskId]) -> Result<(), StateError> {
        for dep in dependencies {
            self.wait_for(task, dep)?;
        }
        Ok(())
    }

    /// Mark a task clean once its cleanup ran. The owning change must be ready.
    pub fn set_task_clean(&mut self, id: &TaskId) -> Result<(), StateError> {
        if let Some(change) = self.require_task(id)?.change.clone() {
            if !self.change_status(&change).is_ready() {
                return Err(StateError::ChangeNotReady(change));
            }
        }
        self.touch();
        if let Some(t) = self.tasks.get_mut(id) {
            t.clean = true;
        }
        Ok(())
    }

    /// Remove a task and every edge pointing at it.
    pub(crate) fn delete_task(&mut self, id: &TaskId) {
        let Some(task) = self.tasks.remove(id) else {
            return;
        };
        self.touch();
        for other in task.wait_tasks.iter().chain(task.halt_tasks.iter()) {
            if let Some(t) = self.tasks.get_mut(other) {
                t.wait_tasks.retain(|w| w != id);
                t.halt_tasks.retain(|h| h != id);
            }
        }
    }

    /// Remove a change and all of its tasks.
    pub(crate) fn delete_change(&mut self, id: &ChangeId) -> usize {
        let Some(chg) = self.changes.remove(id) else {
            return 0;
        };
        self.touch();
        for tid in &chg.task_ids {
            self.delete_task(tid);
        }
        chg.task_ids.len()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
