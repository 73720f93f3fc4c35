//! System restart specs
//!
//! Verify that work parked for a reboot resumes only once the boot id
//! changes, across a reopened state file.

use crate::prelude::*;
use std::sync::Arc;

/// Register a "link-kernel" handler that finishes by asking for a reboot.
fn add_rebooting_handler(o: &Overlord) {
    let restart = Arc::clone(o.restart_manager());
    o.task_runner().add_handler(
        "link-kernel",
        handler(move |task, _cancel| {
            let restart = Arc::clone(&restart);
            async move {
                let mut st = task.state().lock();
                restart.finish_task_with_restart(
                    &mut st,
                    task.id(),
                    Status::Done,
                    RestartType::System,
                )?;
                st.unlock()?;
                Ok(())
            }
        }),
        None,
    );
}

fn register(o: &Overlord) {
    add_rebooting_handler(o);
    o.task_runner().add_handler("cleanup", succeed(), None);
}

/// Run the first boot until the kernel link requests a reboot.
async fn run_until_reboot(engine: &Engine) -> (ChangeId, TaskId, TaskId) {
    let o = engine.open();
    register(&o);
    o.start_up().unwrap();
    let ids = {
        let mut st = o.state().lock();
        let chg = st.new_change("refresh", "Refresh kernel");
        let link = st.new_task("link-kernel", "Make kernel available");
        let cleanup = st.new_task("cleanup", "Remove old kernel");
        st.add_all(&chg, &[link.clone(), cleanup.clone()]).unwrap();
        st.wait_for(&cleanup, &link).unwrap();
        st.ensure_before(std::time::Duration::ZERO);
        st.unlock().unwrap();
        (chg, link, cleanup)
    };
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    let (chg, link, cleanup) = &ids;
    assert_eq!(task_status(&o, link), Status::Done);
    assert_eq!(task_status(&o, cleanup), Status::Wait);
    assert_eq!(o.state().lock().change_status(chg), Status::Wait);
    assert_eq!(o.restart_manager().restart_pending(), Some(RestartType::System));
    ids
}

#[tokio::test]
async fn parked_work_resumes_after_reboot() {
    let engine = Engine::new();
    let (chg, _, cleanup) = run_until_reboot(&engine).await;
    assert_eq!(engine.restarts.calls(), vec![RestartType::System]);

    engine.boot_id.set("boot-2");
    let o = engine.open();
    register(&o);
    o.start_up().unwrap();
    o.restart_manager().check_rebooted().unwrap();
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &cleanup), Status::Done);
    assert_eq!(o.state().lock().change_status(&chg), Status::Done);
    assert_eq!(engine.restarts.calls(), vec![RestartType::System]);
}

#[tokio::test]
async fn missed_reboot_is_requested_again() {
    let engine = Engine::new();
    let (chg, _, cleanup) = run_until_reboot(&engine).await;

    let o = engine.open();
    register(&o);
    o.start_up().unwrap();
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert!(o.restart_manager().check_rebooted().is_err());
    assert_eq!(
        engine.restarts.calls(),
        vec![RestartType::System, RestartType::System]
    );
    assert_eq!(task_status(&o, &cleanup), Status::Wait);
    assert_eq!(o.state().lock().change_status(&chg), Status::Wait);
}

#[tokio::test]
async fn missed_reboot_fails_the_change_when_configured() {
    let engine = Engine::new();
    let (chg, link, cleanup) = run_until_reboot(&engine).await;

    let o = engine.open_with(OverlordConfig {
        missed_reboot: MissedRebootPolicy::Fail,
        ..engine.config()
    });
    register(&o);
    o.start_up().unwrap();
    o.settle(SETTLE_TIMEOUT).await.unwrap();

    assert_eq!(task_status(&o, &cleanup), Status::Error);
    assert_eq!(task_status(&o, &link), Status::Done);
    let st = o.state().lock();
    assert_eq!(st.change_status(&chg), Status::Error);
    let err = st.change_err(&chg).unwrap().to_string();
    assert!(err.contains("system restart did not happen"), "{err}");
}
