// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health projection: per-worker sync status plus master info, assembled
//! into one serializable document.

use super::session::{AgentInfoSyncStatus, IntegrityCheckStatus, IntegritySyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::SyncTime;

/// The `get_health` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDocument {
    pub n_connected_nodes: usize,
    pub nodes: BTreeMap<String, NodeHealth>,
}

/// One node in the health document. The master entry carries info only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub info: NodeInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

/// Basic node identity, shared by `get_nodes` and `get_health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub version: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_active_agents: Option<u64>,
}

/// Sync status of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub sync_integrity_free: bool,
    pub last_check_integrity: IntegrityCheckStatus,
    pub last_sync_integrity: IntegritySyncStatus,
    pub last_sync_agentinfo: AgentInfoSyncStatus,
    pub last_keep_alive: SyncTime,
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
