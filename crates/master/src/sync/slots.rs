// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker sync slot gate.
//!
//! Two booleans prevent sync rounds from overlapping: `integrity_free` is
//! shared by the integrity and extra-valid pipelines, `agent_info_free`
//! guards the agent-info pipeline. `extra_valid_requested` may only be true
//! while the integrity slot is held.

use parking_lot::Mutex;

#[derive(Debug)]
struct SlotState {
    integrity_free: bool,
    agent_info_free: bool,
    extra_valid_requested: bool,
}

/// Mutual-exclusion gate for one worker session.
#[derive(Debug)]
pub struct SyncSlots {
    inner: Mutex<SlotState>,
}

impl Default for SyncSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSlots {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                integrity_free: true,
                agent_info_free: true,
                extra_valid_requested: false,
            }),
        }
    }

    /// Observe the integrity slot (permission probes).
    pub fn integrity_free(&self) -> bool {
        self.inner.lock().integrity_free
    }

    /// Observe the agent-info slot (permission probes).
    pub fn agent_info_free(&self) -> bool {
        self.inner.lock().agent_info_free
    }

    pub fn extra_valid_requested(&self) -> bool {
        self.inner.lock().extra_valid_requested
    }

    /// Take the integrity slot for a new integrity round.
    pub fn reserve_integrity(&self) {
        self.inner.lock().integrity_free = false;
    }

    /// Take the agent-info slot for a new agent-info round.
    pub fn reserve_agent_info(&self) {
        self.inner.lock().agent_info_free = false;
    }

    /// Release the integrity slot directly (worker-reported sync error).
    pub fn release_integrity(&self) {
        let mut state = self.inner.lock();
        state.integrity_free = true;
        state.extra_valid_requested = false;
    }

    /// Release the agent-info slot when its round completes.
    pub fn release_agent_info(&self) {
        self.inner.lock().agent_info_free = true;
    }

    /// Record whether the integrity round requested extra-valid files. Only
    /// meaningful while the integrity slot is held.
    pub fn set_extra_valid_requested(&self, requested: bool) {
        let mut state = self.inner.lock();
        debug_assert!(
            !requested || !state.integrity_free,
            "extra-valid may only be requested during an integrity round"
        );
        state.extra_valid_requested = requested;
    }

    /// Integrity round finished. The slot is freed unless the master still
    /// waits for extra-valid files.
    pub fn finish_integrity(&self) {
        let mut state = self.inner.lock();
        if !state.extra_valid_requested {
            state.integrity_free = true;
        }
    }

    /// Extra-valid round finished (success or failure). Frees the shared
    /// slot and clears the request flag.
    pub fn finish_extra_valid(&self) {
        let mut state = self.inner.lock();
        state.extra_valid_requested = false;
        state.integrity_free = true;
    }
}

#[cfg(test)]
#[path = "slots_tests.rs"]
mod tests;
