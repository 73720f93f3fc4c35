//! Test helpers for behavioral specifications.
//!
//! Provides fixtures for driving the `ovld` binary and an in-process engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

pub use ovl_core::{ChangeId, Status, TaskId};
pub use ovl_engine::{
    handler, FakeBootId, FakeRestartHandler, HandlerError, MissedRebootPolicy, Overlord,
    OverlordConfig, RestartType,
};
pub use ovl_storage::{AddNoticeOptions, NoticeFilter, NoticeType};

// Spec polling timeouts
pub const SPEC_POLL_INTERVAL_MS: u64 = 10;
pub const SPEC_WAIT_MAX_MS: u64 = 2000;
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the path to a binary, checking llvm-cov target directory first.
/// Falls back to resolving relative to the test binary itself.
fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let llvm_cov_path = manifest_dir.join("target/llvm-cov-target/debug").join(name);
    if llvm_cov_path.exists() {
        return llvm_cov_path;
    }

    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }

    // The test binary lives at target/debug/deps/specs-<hash>.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

/// Returns the path to the ovld daemon binary.
pub fn ovld_binary() -> PathBuf {
    binary_path("ovld")
}

/// Command running ovld against `state_dir`.
pub fn ovld(state_dir: &Path) -> Command {
    let mut cmd = Command::new(ovld_binary());
    cmd.env("OVL_STATE_DIR", state_dir)
        .env("OVL_REBOOT_COMMAND", "/bin/true")
        .env_remove("RUST_LOG");
    cmd
}

/// Poll until condition is true or timeout
pub fn wait_for<F>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(SPEC_POLL_INTERVAL_MS));
    }
    false
}

/// A running ovld process with its own state directory.
pub struct Daemon {
    pub dir: tempfile::TempDir,
    pub child: Child,
}

impl Daemon {
    /// Start ovld and wait for it to report READY.
    pub fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut child = ovld(dir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("ovld should start");
        let stdout = child.stdout.take().unwrap();
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).unwrap();
        assert_eq!(line.trim(), "READY", "unexpected daemon output: {line}");
        Self { dir, child }
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.path().join("ovld.pid")
    }

    pub fn log(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("ovld.log")).unwrap_or_default()
    }

    /// Send SIGTERM and wait for the process to exit.
    pub fn terminate(mut self) -> (std::process::ExitStatus, tempfile::TempDir) {
        let status = Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        let exit = self.child.wait().unwrap();
        let dir = std::mem::replace(&mut self.dir, tempfile::tempdir().unwrap());
        (exit, dir)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// An in-process engine rooted in a temporary state directory.
pub struct Engine {
    pub dir: tempfile::TempDir,
    pub boot_id: FakeBootId,
    pub restarts: FakeRestartHandler,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            boot_id: FakeBootId::new("boot-1"),
            restarts: FakeRestartHandler::new(),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    pub fn config(&self) -> OverlordConfig {
        OverlordConfig {
            state_path: Some(self.state_path()),
            ..OverlordConfig::default()
        }
    }

    /// Open an overlord on the state file, as a fresh process would.
    pub fn open(&self) -> Overlord {
        self.open_with(self.config())
    }

    pub fn open_with(&self, config: OverlordConfig) -> Overlord {
        Overlord::new(config, Arc::new(self.restarts.clone()), &self.boot_id).unwrap()
    }
}

/// Handler that succeeds immediately.
pub fn succeed() -> ovl_engine::Handler {
    handler(|_task, _cancel| async { Ok(()) })
}

/// Handler that fails for tasks whose summary is listed.
pub fn fail_for(summaries: &'static [&'static str]) -> ovl_engine::Handler {
    handler(move |task, _cancel| async move {
        let summary = task.with(|t| t.summary().to_string())?;
        if summaries.contains(&summary.as_str()) {
            return Err(HandlerError::failed(format!("{summary} broke")));
        }
        Ok(())
    })
}

pub fn task_status(overlord: &Overlord, tid: &TaskId) -> Status {
    overlord.state().lock().task(tid).unwrap().status()
}
