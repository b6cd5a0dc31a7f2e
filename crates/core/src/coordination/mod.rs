// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination primitives
//!
//! This module provides:
//! - **Limiter** - Counting slots per worker with a FIFO wait list
//! - **ActionQueue** - Per-resource read/write/unlink ordering

pub mod limiter;
pub mod queue;

pub use limiter::{Limiter, LimiterConfig, LimiterSnapshot};
pub use queue::{ActionQueue, QueueInput, QueueSnapshot, QueueState};
