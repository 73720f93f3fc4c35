//! Change execution specs
//!
//! Verify dependency ordering, undo on failure, and lane containment.

use crate::prelude::*;

#[tokio::test]
async fn install_then_link_runs_in_order() {
    let engine = Engine::new();
    let o = engine.open();
    o.task_runner().add_handler("download", succeed(), None);
    o.task_runner().add_handler("link", succeed(), None);

    let (chg, download, link) = {
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let download = st.new_task("download", "Download pkg");
        let link = st.new_task("link", "Link pkg");
        st.add_all(&chg, &[download.clone(), link.clone()]).unwrap();
        st.wait_for(&link, &download).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
        (chg, download, link)
    };

    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &download), Status::Done);
    assert_eq!(task_status(&o, &link), Status::Done);
    let st = o.state().lock();
    assert_eq!(st.change_status(&chg), Status::Done);
    assert!(st.change_ready_time(&chg).is_some());
    assert!(st.change_err(&chg).is_none());
}

#[tokio::test]
async fn failed_link_undoes_download() {
    let engine = Engine::new();
    let o = engine.open();
    let undone = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = undone.clone();
    o.task_runner().add_handler(
        "download",
        succeed(),
        Some(handler(move |_task, _cancel| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        })),
    );
    o.task_runner()
        .add_handler("link", fail_for(&["Link pkg"]), None);

    let (chg, download, link) = {
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let download = st.new_task("download", "Download pkg");
        let link = st.new_task("link", "Link pkg");
        st.add_all(&chg, &[download.clone(), link.clone()]).unwrap();
        st.wait_for(&link, &download).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
        (chg, download, link)
    };

    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert!(undone.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(task_status(&o, &download), Status::Undone);
    assert_eq!(task_status(&o, &link), Status::Error);

    let st = o.state().lock();
    assert_eq!(st.change_status(&chg), Status::Error);
    let err = st.change_err(&chg).unwrap().to_string();
    assert!(err.starts_with("cannot perform the following tasks:"), "{err}");
    assert!(err.contains("- Link pkg (Link pkg broke)"), "{err}");
    let link_task = st.task(&link).unwrap();
    assert!(link_task.log().iter().any(|l| l.contains("ERROR Link pkg broke")));
}

#[tokio::test]
async fn failure_in_one_lane_leaves_the_other_alone() {
    let engine = Engine::new();
    let o = engine.open();
    o.task_runner()
        .add_handler("step", fail_for(&["b2"]), Some(succeed()));

    let ids = {
        let mut st = o.state().lock();
        let chg = st.new_change("multi", "two lanes");
        let lane_a = st.new_lane();
        let lane_b = st.new_lane();
        let mut ids = Vec::new();
        for (summary, lane) in [("a1", lane_a), ("a2", lane_a), ("b1", lane_b), ("b2", lane_b)] {
            let tid = st.new_task("step", summary);
            st.task_mut(&tid).unwrap().join_lane(lane);
            st.add_task(&chg, &tid).unwrap();
            ids.push(tid);
        }
        st.wait_for(&ids[1], &ids[0]).unwrap();
        st.wait_for(&ids[3], &ids[2]).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
        ids
    };

    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &ids[0]), Status::Done);
    assert_eq!(task_status(&o, &ids[1]), Status::Done);
    assert_eq!(task_status(&o, &ids[2]), Status::Undone);
    assert_eq!(task_status(&o, &ids[3]), Status::Error);
}

#[tokio::test]
async fn aborting_a_change_holds_tasks_that_never_ran() {
    let engine = Engine::new();
    let o = engine.open();
    o.task_runner().add_handler("step", succeed(), None);

    let (chg, tid) = {
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let tid = st.new_task("step", "never runs");
        st.add_task(&chg, &tid).unwrap();
        st.abort_change(&chg);
        st.unlock().unwrap();
        (chg, tid)
    };

    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &tid), Status::Hold);
    assert_eq!(o.state().lock().change_status(&chg), Status::Hold);
}
