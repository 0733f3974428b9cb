// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of local API client connections.
//!
//! The local API server lives outside this crate; it registers each of its
//! client connections here so worker sessions can forward DAPI responses
//! and errors to the right one.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use warden_core::ClusterError;

/// One message forwarded to a local API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDelivery {
    pub command: String,
    pub payload: Vec<u8>,
}

/// Name → delivery channel of the connected local API clients.
#[derive(Debug, Default)]
pub struct LocalClients {
    inner: Mutex<HashMap<String, mpsc::UnboundedSender<LocalDelivery>>>,
}

impl LocalClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and get its delivery stream.
    pub fn register(&self, name: &str) -> mpsc::UnboundedReceiver<LocalDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().insert(name.to_string(), tx);
        rx
    }

    pub fn unregister(&self, name: &str) {
        self.inner.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// Forward a command to a client. Unknown or gone clients are an error
    /// for the caller to report.
    pub fn deliver(
        &self,
        name: &str,
        command: &str,
        payload: Vec<u8>,
    ) -> Result<(), ClusterError> {
        let inner = self.inner.lock();
        let tx = inner
            .get(name)
            .ok_or_else(|| ClusterError::WorkerNotFound(name.to_string()))?;
        tx.send(LocalDelivery {
            command: command.to_string(),
            payload,
        })
        .map_err(|_| ClusterError::WorkerNotFound(name.to_string()))
    }
}

#[cfg(test)]
#[path = "localapi_tests.rs"]
mod tests;
