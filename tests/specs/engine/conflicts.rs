//! Conflict specs
//!
//! Verify that a change touching a busy resource is refused before anything
//! is written to the state.

use crate::prelude::*;
use ovl_engine::{claim_resource, ConflictChecker, NewChangeError};

#[tokio::test]
async fn conflicting_change_is_rejected_and_not_persisted() {
    let engine = Engine::new();
    let o = engine.open();
    let checker = ConflictChecker::new();

    let first = {
        let mut st = o.state().lock();
        let chg = checker
            .new_change_checked(&mut st, "refresh", "Refresh pkg", &["pkg"])
            .unwrap();
        let tid = st.new_task("download", "Download pkg");
        claim_resource(st.task_mut(&tid).unwrap(), "pkg").unwrap();
        st.add_task(&chg, &tid).unwrap();
        st.unlock().unwrap();
        chg
    };

    let err = {
        let mut st = o.state().lock();
        let result = checker.new_change_checked(&mut st, "remove", "Remove pkg", &["pkg"]);
        st.unlock().unwrap();
        match result {
            Err(NewChangeError::Conflict(err)) => err,
            other => panic!("expected a conflict, got {other:?}"),
        }
    };
    assert_eq!(err.change_id, first);
    assert_eq!(err.to_string(), "pkg has \"refresh\" change in progress");

    // A fresh process sees only the first change.
    drop(o);
    let reopened = engine.open();
    let st = reopened.state().lock();
    let kinds: Vec<&str> = st.changes().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec!["refresh"]);
}

#[tokio::test]
async fn resource_is_free_once_the_change_is_ready() {
    let engine = Engine::new();
    let o = engine.open();
    o.task_runner().add_handler("download", succeed(), None);
    let checker = ConflictChecker::new();

    {
        let mut st = o.state().lock();
        let chg = checker
            .new_change_checked(&mut st, "refresh", "Refresh pkg", &["pkg"])
            .unwrap();
        let tid = st.new_task("download", "Download pkg");
        claim_resource(st.task_mut(&tid).unwrap(), "pkg").unwrap();
        st.add_task(&chg, &tid).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
    }
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    let mut st = o.state().lock();
    assert!(checker
        .new_change_checked(&mut st, "remove", "Remove pkg", &["pkg"])
        .is_ok());
}
