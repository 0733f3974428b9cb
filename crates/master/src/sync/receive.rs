// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound artifact tasks.
//!
//! A [`ReceiveTask`] is created when a worker announces an inbound artifact
//! (`syn_*_w_m`) and pairs a spawned continuation with a one-shot completion
//! slot. The end-of-transfer command binds the artifact and wakes the
//! continuation; a worker-reported error binds an error instead. On
//! connection loss every live continuation is aborted.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warden_core::ClusterError;

/// The artifact a receive task waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Path of a fully received file.
    File(PathBuf),
    /// Id of an entry in the received-string registry.
    Str(String),
}

/// One pending inbound artifact and the continuation processing it.
#[derive(Debug)]
pub struct ReceiveTask {
    id: String,
    sender: Mutex<Option<oneshot::Sender<Result<Artifact, ClusterError>>>>,
    handle: JoinHandle<()>,
}

impl ReceiveTask {
    pub fn new(
        id: String,
        sender: oneshot::Sender<Result<Artifact, ClusterError>>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            sender: Mutex::new(Some(sender)),
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bind the received artifact and wake the continuation. Returns false
    /// if the task was already completed or cancelled.
    pub fn complete(&self, artifact: Artifact) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(Ok(artifact)).is_ok(),
            None => false,
        }
    }

    /// Bind an error instead of an artifact.
    pub fn fail(&self, error: ClusterError) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    fn abort(&self) {
        self.handle.abort();
    }
}

/// The per-session task map.
#[derive(Debug, Default)]
pub struct ReceiveTasks {
    inner: Mutex<HashMap<String, Arc<ReceiveTask>>>,
}

impl ReceiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Arc<ReceiveTask>) {
        self.inner.lock().insert(task.id().to_string(), task);
    }

    pub fn get(&self, id: &str) -> Option<Arc<ReceiveTask>> {
        self.inner.lock().get(id).cloned()
    }

    /// Drop a finished task. Called by the continuation wrapper on exit.
    pub fn remove(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    /// Abort every live continuation (connection lost).
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for task in inner.values() {
            task.abort();
        }
        inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "receive_tests.rs"]
mod tests;
