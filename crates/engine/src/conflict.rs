// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource conflict checks between in-flight changes.
//!
//! Tasks claim named resources under the [`RESOURCES_KEY`] data key. Managers
//! whose tasks derive the affected resources from other data can register an
//! extractor per task kind instead. A change that has not become ready holds
//! the claims of all its tasks.

use ovl_core::{ChangeId, DataBag, DataError};
use ovl_storage::{StateData, Task};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Data key (on tasks and changes) listing claimed resources.
pub const RESOURCES_KEY: &str = "resources";

/// Derives the resources a task affects from its data.
pub type AffectedFn = Arc<dyn Fn(&Task) -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource} has {change_kind:?} change in progress")]
pub struct ChangeConflictError {
    pub resource: String,
    pub change_kind: String,
    pub change_id: ChangeId,
}

/// Why [`ConflictChecker::new_change_checked`] refused to create a change.
#[derive(Debug, Error)]
pub enum NewChangeError {
    #[error(transparent)]
    Conflict(#[from] ChangeConflictError),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Add `resource` to the resources claimed by `task`.
pub fn claim_resource(task: &mut Task, resource: &str) -> Result<(), DataError> {
    let mut claimed = read_claims(task.get::<Vec<String>>(RESOURCES_KEY))?;
    if !claimed.iter().any(|r| r == resource) {
        claimed.push(resource.to_string());
    }
    task.set(RESOURCES_KEY, &claimed)
}

fn read_claims(stored: Result<Vec<String>, DataError>) -> Result<Vec<String>, DataError> {
    match stored {
        Ok(claimed) => Ok(claimed),
        Err(e) if e.is_no_state() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Registry of per-kind resource extractors.
#[derive(Default)]
pub struct ConflictChecker {
    affected: RwLock<HashMap<String, AffectedFn>>,
}

impl ConflictChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_affected_by_kind(&self, kind: &str, f: AffectedFn) {
        self.affected.write().insert(kind.to_string(), f);
    }

    /// Resources a task affects: its explicit claims plus whatever the
    /// extractor for its kind reports.
    pub fn affected_resources(&self, task: &Task) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = task
            .get::<Vec<String>>(RESOURCES_KEY)
            .unwrap_or_default()
            .into_iter()
            .collect();
        if let Some(f) = self.affected.read().get(task.kind()) {
            out.extend(f(task));
        }
        out
    }

    /// Fail if a non-ready change other than `ignore` claims `resource`.
    pub fn check_conflict(
        &self,
        st: &StateData,
        resource: &str,
        ignore: Option<&ChangeId>,
    ) -> Result<(), ChangeConflictError> {
        for change in st.changes() {
            if ignore == Some(change.id()) || st.is_change_ready(change.id()) {
                continue;
            }
            let on_change = change
                .get::<Vec<String>>(RESOURCES_KEY)
                .unwrap_or_default()
                .iter()
                .any(|r| r == resource);
            let on_task = || {
                st.change_tasks(change.id())
                    .iter()
                    .any(|t| self.affected_resources(t).contains(resource))
            };
            if on_change || on_task() {
                debug!(resource, change_id = %change.id(), kind = change.kind(), "resource conflict");
                return Err(ChangeConflictError {
                    resource: resource.to_string(),
                    change_kind: change.kind().to_string(),
                    change_id: change.id().clone(),
                });
            }
        }
        Ok(())
    }

    /// Create a change claiming `resources` after checking all of them.
    /// Nothing is created on error.
    pub fn new_change_checked(
        &self,
        st: &mut StateData,
        kind: &str,
        summary: &str,
        resources: &[&str],
    ) -> Result<ChangeId, NewChangeError> {
        let mut claims = DataBag::new();
        if !resources.is_empty() {
            claims.set(RESOURCES_KEY, resources)?;
        }
        for resource in resources {
            self.check_conflict(st, resource, None)?;
        }
        let id = st.new_change(kind, summary);
        if let Some(change) = st.change_mut(&id) {
            change.extend_data(claims);
        }
        Ok(id)
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
