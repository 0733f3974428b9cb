// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation for DAPI round-trips and receive tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Fresh request id for a DAPI round-trip.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-session task id generator. Ids are opaque to the peer and only need
/// to be unique within one session.
#[derive(Debug, Default)]
pub struct TaskIdGen {
    counter: AtomicU64,
}

impl TaskIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("task-{n}")
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
