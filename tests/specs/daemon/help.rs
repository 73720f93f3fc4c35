//! Daemon help and version specs
//!
//! Verify ovld --help, --version, and related flags work without
//! acquiring the daemon lock (no startup attempt).

use crate::prelude::*;

#[test]
fn ovld_version_shows_version() {
    for flag in ["--version", "-v", "-V"] {
        let dir = tempfile::tempdir().unwrap();
        let output = ovld(dir.path()).arg(flag).output().unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.trim(), "ovld 0.1.0", "unexpected output for {flag}");
        assert!(
            !dir.path().join("ovld.pid").exists(),
            "{flag} must not start the daemon"
        );
    }
}

#[test]
fn ovld_help_shows_usage() {
    let dir = tempfile::tempdir().unwrap();
    let output = ovld(dir.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("USAGE:"), "got: {stdout}");
    assert!(stdout.contains("--version"), "got: {stdout}");
    assert!(!dir.path().join("ovld.pid").exists());
}

#[test]
fn ovld_rejects_unknown_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let output = ovld(dir.path()).arg("--frobnicate").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unexpected argument '--frobnicate'"));
}
