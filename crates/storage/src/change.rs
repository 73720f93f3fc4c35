// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A named group of tasks that together accomplish one user-visible operation.

use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, ClockHandle, DataBag, DataError, Status, TaskId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Change record. Its aggregate status is derived from its tasks unless
/// explicitly overridden; see [`StateData::change_status`](crate::StateData::change_status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Change {
    pub(crate) id: ChangeId,
    pub(crate) kind: String,
    pub(crate) summary: String,
    #[serde(default)]
    pub(crate) status: Status,
    #[serde(default, skip_serializing_if = "DataBag::is_empty")]
    pub(crate) data: DataBag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) task_ids: Vec<TaskId>,
    pub(crate) spawn_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ready_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) clock: ClockHandle,
}

impl Change {
    pub(crate) fn new(id: ChangeId, kind: &str, summary: &str, clock: ClockHandle) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            summary: summary.to_string(),
            status: Status::Default,
            data: DataBag::new(),
            task_ids: Vec::new(),
            spawn_time: clock.now(),
            ready_time: None,
            clock,
        }
    }

    pub fn id(&self) -> &ChangeId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }

    /// Explicitly set status, or [`Status::Default`] when derived from tasks.
    pub fn explicit_status(&self) -> Status {
        self.status
    }

    /// Override the derived status. Setting [`Status::Default`] returns to
    /// deriving it from the tasks.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.ready_time = status.is_ready().then(|| self.clock.now());
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

    /// Merge pre-encoded data into the change.
    pub fn extend_data(&mut self, data: DataBag) {
        self.data.extend(data);
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.has(key)
    }

    pub fn spawn_time(&self) -> DateTime<Utc> {
        self.spawn_time
    }

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
