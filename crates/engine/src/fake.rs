// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake restart collaborators for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::restart::{BootIdSource, RestartError, RestartHandler, RestartType};
use parking_lot::Mutex;
use std::sync::Arc;

/// Boot id source returning a settable id.
#[derive(Clone)]
pub struct FakeBootId {
    id: Arc<Mutex<String>>,
}

impl FakeBootId {
    pub fn new(id: &str) -> Self {
        Self {
            id: Arc::new(Mutex::new(id.to_string())),
        }
    }

    /// Simulate a reboot.
    pub fn set(&self, id: &str) {
        *self.id.lock() = id.to_string();
    }
}

impl BootIdSource for FakeBootId {
    fn boot_id(&self) -> Result<String, RestartError> {
        Ok(self.id.lock().clone())
    }
}

/// Restart handler that records requests instead of acting on them.
#[derive(Clone, Default)]
pub struct FakeRestartHandler {
    calls: Arc<Mutex<Vec<RestartType>>>,
}

impl FakeRestartHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded restart requests
    pub fn calls(&self) -> Vec<RestartType> {
        self.calls.lock().clone()
    }
}

impl RestartHandler for FakeRestartHandler {
    fn handle_restart(&self, restart: RestartType) {
        self.calls.lock().push(restart);
    }
}
