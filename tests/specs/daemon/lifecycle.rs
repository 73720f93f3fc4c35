//! Daemon lifecycle specs
//!
//! Verify ovld startup, locking, and shutdown.

use crate::prelude::*;

#[test]
fn daemon_writes_pid_and_removes_it_on_sigterm() {
    let daemon = Daemon::start();
    let pid = std::fs::read_to_string(daemon.pid_path()).unwrap();
    assert_eq!(pid.trim(), daemon.child.id().to_string());

    let pid_path = daemon.pid_path();
    let (status, dir) = daemon.terminate();
    assert!(status.success(), "exit status: {status:?}");
    assert!(!pid_path.exists());

    let log = std::fs::read_to_string(dir.path().join("ovld.log")).unwrap();
    assert!(log.contains("--- ovld: starting (pid: "));
}

#[test]
fn second_daemon_reports_already_running() {
    let daemon = Daemon::start();

    let output = ovld(daemon.dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ovld is already running"), "got: {stderr}");
    assert!(stderr.contains(&format!("pid: {}", daemon.child.id())));

    // The running daemon keeps its pid file.
    assert!(daemon.pid_path().exists());
}

#[test]
fn daemon_logs_startup() {
    let daemon = Daemon::start();
    assert!(wait_for(SPEC_WAIT_MAX_MS, || daemon.log().contains("Daemon ready")));
}

#[test]
fn corrupt_state_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), b"{broken").unwrap();

    let output = ovld(dir.path()).output().unwrap();
    assert!(!output.status.success());
    let log = std::fs::read_to_string(dir.path().join("ovld.log")).unwrap();
    assert!(log.contains("ERROR Failed to start daemon"), "log: {log}");
    assert!(!dir.path().join("ovld.pid").exists());
}
