// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent database client.
//!
//! The agent database is a separate service reached over a Unix socket with
//! a 4-byte little-endian length prefix per message. Responses start with a
//! status word (`ok` or an error tag) followed by the body.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use warden_core::ClusterError;

/// Client interface to the agent database.
#[async_trait]
pub trait AgentDb: Send + Sync {
    /// Send a raw query. Returns `(status, body)` without interpreting the
    /// status.
    async fn send(&self, query: &str) -> Result<(String, String), ClusterError>;

    /// Ids of all agents registered on the master.
    async fn agent_ids(&self) -> Result<HashSet<String>, ClusterError>;

    /// Number of active agents reporting through `node`.
    async fn active_agents(&self, node: &str) -> Result<u64, ClusterError>;
}

/// Real client speaking the length-prefixed socket protocol.
pub struct UnixAgentDb {
    socket: PathBuf,
}

impl UnixAgentDb {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    async fn roundtrip(&self, query: &str) -> Result<String, ClusterError> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream
            .write_all(&(query.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(query.as_bytes()).await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        String::from_utf8(body)
            .map_err(|_| ClusterError::InvalidPayload("agent db answered non-UTF-8".to_string()))
    }
}

fn split_status(raw: &str) -> (String, String) {
    match raw.split_once(' ') {
        Some((status, body)) => (status.to_string(), body.to_string()),
        None => (raw.to_string(), String::new()),
    }
}

#[async_trait]
impl AgentDb for UnixAgentDb {
    async fn send(&self, query: &str) -> Result<(String, String), ClusterError> {
        Ok(split_status(&self.roundtrip(query).await?))
    }

    async fn agent_ids(&self) -> Result<HashSet<String>, ClusterError> {
        let (status, body) = self.send("global get-agent-ids").await?;
        if status != "ok" {
            return Err(ClusterError::Internal(format!(
                "agent db refused get-agent-ids: {status} {body}"
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn active_agents(&self, node: &str) -> Result<u64, ClusterError> {
        let (status, body) = self
            .send(&format!("global count-active-agents {node}"))
            .await?;
        if status != "ok" {
            return Err(ClusterError::Internal(format!(
                "agent db refused count-active-agents: {status} {body}"
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Scriptable in-memory agent database for tests.
#[derive(Default)]
pub struct FakeAgentDb {
    agent_ids: Mutex<HashSet<String>>,
    active: Mutex<HashMap<String, u64>>,
    responses: Mutex<VecDeque<Result<(String, String), ClusterError>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeAgentDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(self, ids: &[&str]) -> Self {
        *self.agent_ids.lock() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn set_active(&self, node: &str, count: u64) {
        self.active.lock().insert(node.to_string(), count);
    }

    /// Queue the response for the next `send` call. When the queue is
    /// empty, `send` answers `("ok", "")`.
    pub fn push_response(&self, response: Result<(String, String), ClusterError>) {
        self.responses.lock().push_back(response);
    }

    /// Queries seen so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl AgentDb for FakeAgentDb {
    async fn send(&self, query: &str) -> Result<(String, String), ClusterError> {
        self.queries.lock().push(query.to_string());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(("ok".to_string(), String::new())))
    }

    async fn agent_ids(&self) -> Result<HashSet<String>, ClusterError> {
        Ok(self.agent_ids.lock().clone())
    }

    async fn active_agents(&self, node: &str) -> Result<u64, ClusterError> {
        Ok(self.active.lock().get(node).copied().unwrap_or(0))
    }
}

#[cfg(test)]
#[path = "agentdb_tests.rs"]
mod tests;
