// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared state handle with lock-scoped persistence.
//!
//! All access to [`StateData`] goes through [`State::lock`]. Releasing the
//! returned guard persists the document through the [`Backend`] when it was
//! modified, so every mutation made under one lock becomes durable as a unit.

use crate::checkpoint::{read_state, CheckpointError};
use crate::error::StateError;
use crate::state::StateData;
use ovl_core::{ChangeId, Clock, Status};
use parking_lot::{Mutex, MutexGuard};
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, warn};

/// Persistence and scheduling services the state relies on.
pub trait Backend: Send + Sync + 'static {
    /// Durably store an encoded state document.
    fn checkpoint(&self, data: &[u8]) -> Result<(), CheckpointError>;

    /// Request that the ensure loop runs again within `d`.
    fn ensure_before(&self, d: Duration);
}

/// Backend that keeps nothing on disk and ignores ensure requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    fn checkpoint(&self, _data: &[u8]) -> Result<(), CheckpointError> {
        Ok(())
    }

    fn ensure_before(&self, _d: Duration) {}
}

/// How long a failing checkpoint is retried before unlock gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_time: Duration::from_secs(5 * 60),
        }
    }
}

struct Inner {
    data: Mutex<StateData>,
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
    changed: Notify,
}

/// Cloneable handle to the process-wide state.
#[derive(Clone)]
pub struct State {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").finish_non_exhaustive()
    }
}

impl State {
    /// Empty state persisted through `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_data(StateData::new(), backend, RetryPolicy::default())
    }

    /// Empty state that lives only in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend))
    }

    pub fn with_data(data: StateData, backend: Arc<dyn Backend>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(data),
                backend,
                retry,
                changed: Notify::new(),
            }),
        }
    }

    /// Load a previously persisted document.
    pub fn read(reader: impl Read, backend: Arc<dyn Backend>) -> Result<Self, StateError> {
        let data = read_state(reader)?;
        Ok(Self::with_data(data, backend, RetryPolicy::default()))
    }

    /// Stamp times with `clock` instead of the system clock.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.inner.data.lock().set_clock(clock);
    }

    /// Acquire exclusive access to the document.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            state: self,
            data: self.inner.data.lock(),
            released: false,
        }
    }

    /// Ask the ensure loop to run again within `d`.
    pub fn ensure_before(&self, d: Duration) {
        self.inner.backend.ensure_before(d);
    }

    /// Signalled whenever a modified document was persisted.
    pub(crate) fn changed(&self) -> &Notify {
        &self.inner.changed
    }

    /// Wait until the change is ready, returning its final status, or `None`
    /// if the change does not exist (or was pruned).
    pub async fn wait_change_ready(&self, id: &ChangeId) -> Option<Status> {
        loop {
            let notified = self.changed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let st = self.lock();
                st.change(id)?;
                if st.is_change_ready(id) {
                    return Some(st.change_status(id));
                }
            }
            notified.await;
        }
    }
}

/// Exclusive access to the state document.
///
/// Dropping the guard persists a modified document and logs a failure;
/// [`StateGuard::unlock`] does the same but returns the failure.
pub struct StateGuard<'a> {
    state: &'a State,
    data: MutexGuard<'a, StateData>,
    released: bool,
}

impl StateGuard<'_> {
    /// Release the lock, persisting the document if it was modified.
    ///
    /// On failure the document stays marked modified, so the next unlock
    /// tries again.
    pub fn unlock(mut self) -> Result<(), StateError> {
        self.released = true;
        self.persist()
    }

    /// Ask the ensure loop to run again within `d`.
    pub fn ensure_before(&self, d: Duration) {
        self.state.ensure_before(d);
    }

    /// Handle to the state this guard locks.
    pub fn state(&self) -> &State {
        self.state
    }

    fn persist(&mut self) -> Result<(), StateError> {
        if !self.data.modified {
            return Ok(());
        }
        self.data.record_change_updates();
        let json = self.data.to_json()?;
        let retry = self.state.inner.retry;
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.state.inner.backend.checkpoint(&json) {
                Ok(()) => break,
                Err(e) => {
                    if started.elapsed() + retry.interval > retry.max_time {
                        return Err(CheckpointError::Failed {
                            attempts,
                            last: e.to_string(),
                        }
                        .into());
                    }
                    warn!(error = %e, attempts, "state checkpoint failed, retrying");
                    std::thread::sleep(retry.interval);
                }
            }
        }
        self.data.persisted();
        self.state.inner.changed.notify_waiters();
        Ok(())
    }
}

impl Deref for StateGuard<'_> {
    type Target = StateData;

    fn deref(&self) -> &StateData {
        &self.data
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut StateData {
        &mut self.data
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.persist() {
            error!(error = %e, "cannot persist state on unlock");
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
