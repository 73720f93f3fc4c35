//! Persistence specs
//!
//! Verify the state file survives a process restart and that interrupted
//! work is resumed.

use crate::prelude::*;

#[tokio::test]
async fn values_and_changes_survive_reopen() {
    let engine = Engine::new();
    let chg = {
        let o = engine.open();
        let mut st = o.state().lock();
        st.set("seeded", &true).unwrap();
        st.set("models", &vec!["pc", "pi"]).unwrap();
        let chg = st.new_change("install", "Install pkg");
        let tid = st.new_task("download", "Download pkg");
        st.task_mut(&tid).unwrap().set("channel", "stable").unwrap();
        st.add_task(&chg, &tid).unwrap();
        st.unlock().unwrap();
        chg
    };

    let o = engine.open();
    let st = o.state().lock();
    assert!(st.get::<bool>("seeded").unwrap());
    assert_eq!(st.get::<Vec<String>>("models").unwrap(), vec!["pc", "pi"]);
    let tasks = st.change_tasks(&chg);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].summary(), "Download pkg");
    assert_eq!(tasks[0].get::<String>("channel").unwrap(), "stable");
    assert_eq!(tasks[0].status(), Status::Do);
}

#[tokio::test]
async fn state_file_is_compressed_by_default() {
    let engine = Engine::new();
    {
        let o = engine.open();
        let mut st = o.state().lock();
        st.set("k", "v").unwrap();
        st.unlock().unwrap();
    }

    let bytes = std::fs::read(engine.state_path()).unwrap();
    assert_eq!(&bytes[..4], &[0x28, 0xB5, 0x2F, 0xFD]);
    let json: serde_json::Value =
        serde_json::from_slice(&zstd::decode_all(bytes.as_slice()).unwrap()).unwrap();
    assert_eq!(json["data"]["k"], "v");
}

#[tokio::test]
async fn task_interrupted_while_doing_runs_again() {
    let engine = Engine::new();
    let (chg, tid) = {
        let o = engine.open();
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let tid = st.new_task("download", "Download pkg");
        st.add_task(&chg, &tid).unwrap();
        st.task_mut(&tid).unwrap().set_status(Status::Doing);
        st.unlock().unwrap();
        // Dropped without stopping, as if the process died mid-handler.
        (chg, tid)
    };

    let o = engine.open();
    o.task_runner().add_handler("download", succeed(), None);
    o.start_up().unwrap();
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &tid), Status::Done);
    assert_eq!(o.state().lock().change_status(&chg), Status::Done);
}

#[tokio::test]
async fn prune_keeps_at_most_the_configured_ready_changes() {
    let engine = Engine::new();
    let o = engine.open_with(OverlordConfig {
        max_ready_changes: 0,
        ..engine.config()
    });
    o.task_runner().add_handler("download", succeed(), None);
    let chg = {
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let tid = st.new_task("download", "Download pkg");
        st.add_task(&chg, &tid).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
        chg
    };
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    let report = o.prune();
    assert_eq!(report.removed_changes, vec![chg.clone()]);
    assert!(o.state().lock().change(&chg).is_none());
}

#[tokio::test]
async fn notices_survive_reopen() {
    let engine = Engine::new();
    let (chg, warning) = {
        let o = engine.open();
        let mut st = o.state().lock();
        let chg = st.new_change("install", "Install pkg");
        let tid = st.new_task("download", "Download pkg");
        st.add_task(&chg, &tid).unwrap();
        let warning = st
            .add_notice(None, NoticeType::Warning, "low disk space", AddNoticeOptions::default())
            .unwrap();
        st.unlock().unwrap();
        (chg, warning)
    };

    let o = engine.open();
    let st = o.state().lock();
    assert_eq!(st.notice(&warning).unwrap().key(), "low disk space");
    let updates = st.notices(&NoticeFilter {
        types: vec![NoticeType::ChangeUpdate],
        ..NoticeFilter::default()
    });
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].key(), chg.as_str());
}
