// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for the overlord: the state document, its task graph,
//! notices, and durable checkpoints.

mod change;
mod checkpoint;
mod error;
mod graph;
mod lock;
mod migration;
mod notices;
mod prune;
mod state;
mod task;

pub use change::Change;
pub use checkpoint::{
    decode_state, load_state, read_state, CheckpointError, CheckpointResult, CheckpointWriter,
    Checkpointer, FsCheckpointWriter,
};
pub use error::StateError;
pub use graph::ChangeError;
pub use lock::{Backend, MemoryBackend, RetryPolicy, State, StateGuard};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use notices::{
    AddNoticeOptions, Notice, NoticeFilter, NoticeType, DEFAULT_NOTICE_EXPIRE_AFTER,
};
pub use prune::{PruneLimits, PruneReport};
pub use state::{StateData, CURRENT_FORMAT_VERSION};
pub use task::{Progress, Task, MAX_LOG_ENTRIES};
