// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-info sync continuation.
//!
//! The worker ships its agent database rows as a JSON document of chunks;
//! each chunk is forwarded to the agent database. Chunk failures are
//! collected, never fatal: the worker always gets a result document back.

use super::session::WorkerSession;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use warden_core::{ClusterError, SyncTime};
use warden_wire::codes;

/// Inbound payload: `{"set_data_command": ..., "chunks": [...]}`.
#[derive(Debug, Deserialize)]
pub struct AgentInfoPayload {
    pub set_data_command: String,
    pub chunks: Vec<String>,
}

/// Result document sent back as `syn_m_a_e`.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentInfoResult {
    pub updated_chunks: u64,
    pub error_messages: Vec<serde_json::Value>,
}

impl WorkerSession {
    /// Continuation for `syn_a_w_m`. The string artifact is keyed by the
    /// task id itself.
    pub(crate) async fn sync_agent_info(
        self: &Arc<Self>,
        task_id: &str,
    ) -> Result<Vec<u8>, ClusterError> {
        info!("Starting");
        let date_start = SyncTime::from(self.server().clock().utc_now());

        let raw = self.in_str.lock().remove(task_id);
        let Some(raw) = raw else {
            let _ = self
                .link()
                .send_request(
                    codes::SYNC_AGENT_INFO_ERR,
                    format!("error while trying to access string under task_id {task_id}.")
                        .as_bytes(),
                )
                .await;
            return Err(ClusterError::StringNotFound(task_id.to_string()));
        };

        let data: AgentInfoPayload = match serde_json::from_slice(&raw) {
            Ok(data) => data,
            Err(e) => {
                let _ = self
                    .link()
                    .send_request(
                        codes::SYNC_AGENT_INFO_ERR,
                        format!("error while trying to load JSON: {e}").as_bytes(),
                    )
                    .await;
                return Err(ClusterError::InvalidPayload(e.to_string()));
            }
        };

        let mut result = AgentInfoResult::default();
        let total = data.chunks.len();
        for (i, chunk) in data.chunks.iter().enumerate() {
            debug!("Sending chunk {}/{} to the agent db", i + 1, total);
            match self
                .server()
                .agentdb()
                .send(&format!("{} {}", data.set_data_command, chunk))
                .await
            {
                Ok((status, body)) => {
                    if status == "ok" {
                        result.updated_chunks += 1;
                    } else {
                        error!(
                            "Response for chunk {}/{} was not 'ok': {} {}",
                            i + 1,
                            total,
                            status,
                            body
                        );
                        result
                            .error_messages
                            .push(serde_json::json!([status, body]));
                    }
                }
                Err(e) => result.error_messages.push(serde_json::json!(e.to_string())),
            }
        }

        let response = self
            .link()
            .send_request(codes::SYNC_AGENT_INFO_RESULT, &serde_json::to_vec(&result)?)
            .await?;

        let date_end = SyncTime::from(self.server().clock().utc_now());
        {
            let mut status = self.agent_info_sync.lock();
            status.date_start_master = date_start;
            status.date_end_master = date_end;
            status.n_synced_chunks = result.updated_chunks;
        }
        info!(
            "Finished in {:.3}s ({} chunks updated).",
            date_end.secs_since(date_start),
            result.updated_chunks
        );
        Ok(response)
    }
}
