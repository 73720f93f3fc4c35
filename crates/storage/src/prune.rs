// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention of finished changes, abandoned tasks, and expired notices.

use crate::state::StateData;
use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, TaskId};
use std::time::Duration;

/// Retention limits applied by [`StateData::prune`].
#[derive(Debug, Clone, Copy)]
pub struct PruneLimits {
    /// Ready changes, empty changes, and unlinked tasks older than this are removed.
    pub prune_wait: Duration,
    /// Changes still not ready after this long are aborted.
    pub abort_wait: Duration,
    /// Ready changes beyond this count are removed oldest first.
    pub max_ready_changes: usize,
}

/// What a prune pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub aborted: Vec<ChangeId>,
    pub removed_changes: Vec<ChangeId>,
    pub removed_tasks: usize,
    pub removed_notices: usize,
}

fn before(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(wait)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl StateData {
    /// Abort stale unfinished changes, drop old finished ones, and drop
    /// expired notices.
    pub fn prune(&mut self, now: DateTime<Utc>, limits: PruneLimits) -> PruneReport {
        let prune_limit = before(now, limits.prune_wait);
        let abort_limit = before(now, limits.abort_wait);
        let mut report = PruneReport {
            removed_notices: self.prune_notices(now),
            ..PruneReport::default()
        };

        let unlinked: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.change.is_none() && t.spawn_time < prune_limit)
            .map(|t| t.id.clone())
            .collect();
        for tid in unlinked {
            self.delete_task(&tid);
            report.removed_tasks += 1;
        }

        let mut ready: Vec<(DateTime<Utc>, ChangeId)> = Vec::new();
        let ids: Vec<ChangeId> = self.changes.keys().cloned().collect();
        for id in ids {
            let Some(chg) = self.changes.get(&id) else {
                continue;
            };
            if chg.task_ids.is_empty() {
                if chg.spawn_time < prune_limit {
                    self.delete_change(&id);
                    report.removed_changes.push(id);
                }
                continue;
            }
            match self.change_ready_time(&id) {
                Some(ready_time) => ready.push((ready_time, id)),
                None => {
                    if chg.spawn_time < abort_limit {
                        self.abort_change(&id);
                        report.aborted.push(id);
                    }
                }
            }
        }

        ready.sort();
        let mut remaining = ready.len();
        for (ready_time, id) in ready {
            if ready_time < prune_limit || remaining > limits.max_ready_changes {
                report.removed_tasks += self.delete_change(&id);
                report.removed_changes.push(id);
                remaining -= 1;
            }
        }

        report
    }
}

#[cfg(test)]
#[path = "prune_tests.rs"]
mod tests;
