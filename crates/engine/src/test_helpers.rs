// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for the engine crate.

use crate::handler::{handler, Handler};
use crate::taskrunner::TaskRunner;
use crate::HandlerError;
use ovl_core::{ChangeId, Status, TaskId};
use ovl_storage::State;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records handler invocations as `"<phase>:<summary>"`.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Handler that records its run and succeeds.
    pub fn ok(&self, phase: &'static str) -> Handler {
        self.respond(phase, |_| Ok(()))
    }

    /// Handler that records its run and fails for tasks whose summary is in
    /// `failing`.
    pub fn failing(&self, phase: &'static str, failing: &'static [&'static str]) -> Handler {
        self.respond(phase, move |summary| {
            if failing.contains(&summary) {
                Err(HandlerError::failed(format!("{summary} failed")))
            } else {
                Ok(())
            }
        })
    }

    fn respond(
        &self,
        phase: &'static str,
        outcome: impl Fn(&str) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Handler {
        let calls = Arc::clone(&self.calls);
        let outcome = Arc::new(outcome);
        handler(move |task, _cancel| {
            let calls = Arc::clone(&calls);
            let outcome = Arc::clone(&outcome);
            async move {
                let summary = task.with(|t| t.summary().to_string())?;
                calls.lock().push(format!("{phase}:{summary}"));
                outcome(&summary)
            }
        })
    }
}

/// Run ensure passes until two in a row leave every task unchanged.
pub(crate) async fn drive(runner: &TaskRunner, state: &State) {
    let mut last = snapshot(state);
    let mut quiet = 0;
    for _ in 0..50 {
        runner.ensure().unwrap();
        runner.wait().await;
        let now = snapshot(state);
        quiet = if now == last { quiet + 1 } else { 0 };
        if quiet >= 2 {
            return;
        }
        last = now;
    }
    panic!("task runner did not settle");
}

fn snapshot(state: &State) -> Vec<(TaskId, Status, bool)> {
    let st = state.lock();
    st.tasks()
        .map(|t| (t.id().clone(), t.status(), t.is_clean()))
        .collect()
}

/// Create a change with one task per summary, all of `kind`.
pub(crate) fn new_change(state: &State, kind: &str, summaries: &[&str]) -> (ChangeId, Vec<TaskId>) {
    let mut st = state.lock();
    let chg = st.new_change("test", "test change");
    let mut ids = Vec::new();
    for summary in summaries {
        let tid = st.new_task(kind, summary);
        st.add_task(&chg, &tid).unwrap();
        ids.push(tid);
    }
    (chg, ids)
}

pub(crate) fn status(state: &State, tid: &TaskId) -> Status {
    state.lock().task(tid).unwrap().status()
}
