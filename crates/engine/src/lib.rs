// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Overlord engine: the ensure loop, the task runner, restart coordination,
//! and conflict checks.

pub mod conflict;
mod error;
mod handler;
mod overlord;
pub mod restart;
mod scheduler;
mod taskrunner;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeBootId, FakeRestartHandler};

#[cfg(test)]
mod test_helpers;

pub use conflict::{claim_resource, ChangeConflictError, ConflictChecker, NewChangeError};
pub use error::{EngineError, HandlerError};
pub use handler::{handler, BlockedFn, Handler, HandlerFuture, HandlerResult, TaskHandle, TaskPredicate};
pub use overlord::{Overlord, OverlordBackend, OverlordConfig, StateManager};
pub use restart::{
    BootIdSource, BootObservation, KernelBootId, MissedRebootPolicy, RestartBoundary,
    RestartError, RestartHandler, RestartManager, RestartType,
};
pub use scheduler::Scheduler;
pub use taskrunner::TaskRunner;
