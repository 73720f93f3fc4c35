// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Early-ensure deadline tracking

use std::time::Duration;
use tokio::time::Instant;

/// Tracks the earliest requested ensure pass.
#[derive(Debug, Default)]
pub struct Scheduler {
    deadline: Option<Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an ensure no later than `now + d`. Returns true when this
    /// moved the deadline earlier.
    pub fn request(&mut self, d: Duration, now: Instant) -> bool {
        let at = now + d;
        match self.deadline {
            Some(current) if current <= at => false,
            _ => {
                self.deadline = Some(at);
                true
            }
        }
    }

    /// The pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
