// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlator for DAPI round-trips.
//!
//! The caller inserts an entry keyed by request id and waits on the returned
//! receiver; a later `dapi_res` resolves it. Entries for timed-out waits stay
//! in the table so the eventual late response is consumed and discarded
//! instead of surfacing as an unknown request id.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Table of in-flight DAPI requests.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`.
    pub fn insert(&self, request_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Deliver a response. Returns false when nobody ever waited for
    /// `request_id`. A response to a timed-out wait is silently dropped.
    pub fn resolve(&self, request_id: &str, response: String) -> bool {
        match self.inner.lock().remove(request_id) {
            Some(tx) => {
                // The receiver may be gone if the caller timed out; the
                // entry removal is the point.
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without resolving it (caller gave up before any
    /// response can arrive, e.g. forward target not connected).
    pub fn discard(&self, request_id: &str) {
        self.inner.lock().remove(request_id);
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
