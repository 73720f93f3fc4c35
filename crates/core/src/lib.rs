// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ovl-core: identifiers, statuses, clocks, and keyed data shared by the
//! overlord crates.

pub mod clock;
pub mod data;
pub mod id;
pub mod status;

pub use clock::{Clock, ClockHandle, FakeClock, SystemClock};
pub use data::{DataBag, DataError};
pub use id::{ChangeId, TaskId};
pub use status::Status;
