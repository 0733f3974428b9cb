// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker session: command dispatch, hello handshake, base-layer
//! receive plumbing and the sync status records.
//!
//! The connection read loop dispatches one inbound request at a time, so
//! handlers here are non-reentrant per worker. Long-running sync
//! continuations are spawned as tasks and never block the dispatcher.

use super::health::{NodeHealth, NodeInfo, NodeStatus};
use super::link::Link;
use super::Master;
use crate::sync::diff::DiffCounts;
use crate::sync::receive::{Artifact, ReceiveTask, ReceiveTasks};
use crate::sync::slots::SyncSlots;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, Instrument};
use warden_core::{new_request_id, ClusterError, SyncTime, TaskIdGen};
use warden_wire::codes;

/// Identity presented by the worker in its hello.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub name: String,
    pub cluster_name: String,
    pub node_type: String,
    pub version: String,
}

/// Last integrity check (comparison only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheckStatus {
    pub date_start_master: SyncTime,
    pub date_end_master: SyncTime,
}

/// Last integrity sync (the follow-on push, extra-valid included).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegritySyncStatus {
    /// Staging value, promoted to `date_start_master` when the round
    /// closes. Never serialized.
    #[serde(skip)]
    pub tmp_date_start_master: SyncTime,
    pub date_start_master: SyncTime,
    pub date_end_master: SyncTime,
    pub total_extra_valid: u64,
    pub total_files: DiffCounts,
}

/// Last agent-info sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfoSyncStatus {
    pub date_start_master: SyncTime,
    pub date_end_master: SyncTime,
    pub n_synced_chunks: u64,
}

/// An inbound file transfer in progress.
struct InboundFile {
    path: PathBuf,
    file: std::fs::File,
    digest: md5::Context,
}

/// Handler for one worker connection.
pub struct WorkerSession {
    server: Arc<Master>,
    link: Link,
    peer_ip: String,
    info: Mutex<Option<WorkerInfo>>,
    pub(crate) slots: SyncSlots,
    pub(crate) tasks: ReceiveTasks,
    pub(crate) in_str: Mutex<HashMap<String, Vec<u8>>>,
    in_files: Mutex<HashMap<String, InboundFile>>,
    last_keepalive: Mutex<u64>,
    pub(crate) integrity_check: Mutex<IntegrityCheckStatus>,
    pub(crate) integrity_sync: Mutex<IntegritySyncStatus>,
    pub(crate) agent_info_sync: Mutex<AgentInfoSyncStatus>,
    task_ids: TaskIdGen,
}

enum FileSyncKind {
    Integrity,
    ExtraValid,
}

impl WorkerSession {
    pub fn new(server: Arc<Master>, link: Link, peer_ip: String) -> Arc<Self> {
        Arc::new(Self {
            server,
            link,
            peer_ip,
            info: Mutex::new(None),
            slots: SyncSlots::new(),
            tasks: ReceiveTasks::new(),
            in_str: Mutex::new(HashMap::new()),
            in_files: Mutex::new(HashMap::new()),
            last_keepalive: Mutex::new(0),
            integrity_check: Mutex::new(IntegrityCheckStatus::default()),
            integrity_sync: Mutex::new(IntegritySyncStatus::default()),
            agent_info_sync: Mutex::new(AgentInfoSyncStatus::default()),
            task_ids: TaskIdGen::new(),
        })
    }

    pub fn server(&self) -> &Arc<Master> {
        &self.server
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn name(&self) -> Option<String> {
        self.info.lock().as_ref().map(|i| i.name.clone())
    }

    pub(crate) fn require_name(&self) -> Result<String, ClusterError> {
        self.name()
            .ok_or_else(|| ClusterError::Internal("worker has not said hello yet".to_string()))
    }

    pub fn last_keepalive(&self) -> u64 {
        *self.last_keepalive.lock()
    }

    /// Route one inbound command. Returns `(ok, payload)`; errors travel as
    /// their stable JSON encoding.
    pub async fn process_request(self: &Arc<Self>, command: &str, payload: &[u8]) -> (bool, Vec<u8>) {
        debug!(command, "Command received");
        if self.info.lock().is_none() && command != codes::HELLO {
            let err = ClusterError::Internal("worker has not said hello yet".to_string());
            return (false, err.to_json().into_bytes());
        }
        let result = match command {
            codes::HELLO => self.hello(payload).await,
            codes::KEEPALIVE => self.keepalive(payload),
            codes::SYNC_INTEGRITY_PERMISSION | codes::SYNC_AGENT_INFO_PERMISSION => {
                self.get_permission(command)
            }
            codes::SYNC_INTEGRITY_BEGIN
            | codes::SYNC_EXTRA_VALID_BEGIN
            | codes::SYNC_AGENT_INFO_BEGIN => self.setup_sync(command, payload),
            codes::SYNC_INTEGRITY_END | codes::SYNC_EXTRA_VALID_END => self.end_receiving(payload),
            codes::SYNC_INTEGRITY_ERROR => self.sync_error_from_worker(payload),
            codes::DAPI => {
                let name = self.require_name();
                match name {
                    Ok(name) => {
                        self.server.enqueue_dapi(&name, payload.to_vec());
                        Ok(b"Added request to API requests queue".to_vec())
                    }
                    Err(e) => Err(e),
                }
            }
            codes::DAPI_RES => self.process_dapi_res(payload),
            codes::DAPI_ERR => self.forward_dapi_error(payload),
            codes::GET_NODES => self.get_nodes(payload),
            codes::GET_HEALTH => self.get_health(payload).await,
            codes::SEND_SYNC => {
                let name = self.require_name();
                match name {
                    Ok(name) => {
                        self.server.enqueue_sendsync(&name, payload.to_vec());
                        Ok(b"Added request to SendSync requests queue".to_vec())
                    }
                    Err(e) => Err(e),
                }
            }
            codes::NEW_FILE => self.new_file(payload),
            codes::FILE_UPD => self.file_upd(payload),
            codes::FILE_END => self.file_end(payload),
            codes::NEW_STR => self.new_str(payload),
            codes::CANCEL_TASK => self.cancel_task(payload),
            _ => Err(ClusterError::InvalidPayload(format!(
                "unknown command '{command}'"
            ))),
        };
        match result {
            Ok(payload) => (true, payload),
            Err(e) => (false, e.to_json().into_bytes()),
        }
    }

    /// Process the worker's hello: `<name> <cluster> <type> <version>`.
    async fn hello(self: &Arc<Self>, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let mut fields = text.split(' ');
        let (Some(name), Some(cluster_name), Some(node_type), Some(version), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(ClusterError::InvalidPayload(
                "hello must carry 'name cluster type version'".to_string(),
            ));
        };

        self.server.register_worker(name, self)?;
        *self.info.lock() = Some(WorkerInfo {
            name: name.to_string(),
            cluster_name: cluster_name.to_string(),
            node_type: node_type.to_string(),
            version: version.to_string(),
        });
        *self.last_keepalive.lock() = self.server.clock().epoch_secs();

        let config = self.server.config();
        if cluster_name != config.cluster.name {
            return Err(ClusterError::WrongClusterName);
        }
        if version != self.server.version() {
            return Err(ClusterError::WrongVersion);
        }

        let worker_dir = config.worker_dir(name);
        if !worker_dir.exists() {
            std::fs::create_dir_all(&worker_dir)?;
            std::fs::set_permissions(
                &worker_dir,
                std::fs::Permissions::from_mode(config.paths.worker_dir_mode),
            )?;
        }
        info!(worker = name, "Worker connected");
        Ok(format!("Worker {name} added").into_bytes())
    }

    fn keepalive(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        *self.last_keepalive.lock() = self.server.clock().epoch_secs();
        Ok(payload.to_vec())
    }

    /// Permission probe: answer the slot value as a capitalized boolean
    /// string. Integrity probes are additionally limited to one grant per
    /// snapshot cycle per worker.
    fn get_permission(&self, command: &str) -> Result<Vec<u8>, ClusterError> {
        let name = self.require_name()?;
        let permission = match command {
            codes::SYNC_INTEGRITY_PERMISSION => {
                self.server.grant_integrity_probe(&name) && self.slots.integrity_free()
            }
            codes::SYNC_AGENT_INFO_PERMISSION => self.slots.agent_info_free(),
            _ => false,
        };
        Ok(if permission { b"True".to_vec() } else { b"False".to_vec() })
    }

    /// Begin an inbound sync: reserve the slot, spawn the continuation and
    /// hand the task id back to the worker.
    fn setup_sync(self: &Arc<Self>, command: &str, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        self.require_name()?;
        match command {
            codes::SYNC_INTEGRITY_BEGIN => {
                self.slots.reserve_integrity();
                let task_id = self.task_ids.next_id();
                self.spawn_file_sync(task_id.clone(), FileSyncKind::Integrity);
                Ok(task_id.into_bytes())
            }
            codes::SYNC_EXTRA_VALID_BEGIN => {
                // Runs under the integrity slot reserved by the preceding
                // integrity round.
                let task_id = self.task_ids.next_id();
                self.spawn_file_sync(task_id.clone(), FileSyncKind::ExtraValid);
                Ok(task_id.into_bytes())
            }
            codes::SYNC_AGENT_INFO_BEGIN => {
                self.slots.reserve_agent_info();
                // The string artifact is already in the registry; its id is
                // the task id.
                let task_id = String::from_utf8_lossy(payload).into_owned();
                self.spawn_agent_info_sync(task_id.clone());
                Ok(task_id.into_bytes())
            }
            _ => Err(ClusterError::InvalidPayload(format!(
                "unknown sync setup command '{command}'"
            ))),
        }
    }

    fn spawn_file_sync(self: &Arc<Self>, task_id: String, kind: FileSyncKind) {
        let (tx, rx) = oneshot::channel();
        let session = Arc::clone(self);
        let id = task_id.clone();
        let worker = self.name().unwrap_or_default();
        let handle = tokio::spawn(async move {
            match kind {
                FileSyncKind::Integrity => {
                    let span = tracing::info_span!("Integrity check", worker = %worker);
                    if let Err(e) = session.sync_integrity(&id, rx).instrument(span).await {
                        tracing::error!(worker = %worker, error = %e, "Integrity sync failed");
                    }
                    session.slots.finish_integrity();
                }
                FileSyncKind::ExtraValid => {
                    let span = tracing::info_span!("Integrity sync", worker = %worker);
                    if let Err(e) = session.sync_extra_valid(&id, rx).instrument(span).await {
                        tracing::error!(worker = %worker, error = %e, "Extra-valid sync failed");
                    }
                    session.slots.finish_extra_valid();
                }
            }
            session.tasks.remove(&id);
        });
        self.tasks
            .insert(Arc::new(ReceiveTask::new(task_id, tx, handle)));
    }

    fn spawn_agent_info_sync(self: &Arc<Self>, task_id: String) {
        // Agent-info continuations never wait on this channel; the sender
        // only keeps the task shape uniform for cancellation.
        let (tx, _rx) = oneshot::channel();
        let session = Arc::clone(self);
        let id = task_id.clone();
        let worker = self.name().unwrap_or_default();
        let handle = tokio::spawn(async move {
            let span = tracing::info_span!("Agent-info sync", worker = %worker);
            if let Err(e) = session.sync_agent_info(&id).instrument(span).await {
                tracing::error!(worker = %worker, error = %e, "Agent-info sync failed");
            }
            session.slots.release_agent_info();
            session.tasks.remove(&id);
        });
        self.tasks
            .insert(Arc::new(ReceiveTask::new(task_id, tx, handle)));
    }

    /// End of an inbound transfer: `task-id filename`.
    fn end_receiving(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let (task_id, filename) = text.split_once(' ').ok_or_else(|| {
            ClusterError::InvalidPayload("expected 'task-id filename'".to_string())
        })?;
        let task = self.tasks.get(task_id).ok_or_else(|| {
            ClusterError::InvalidPayload(format!("unknown sync task '{task_id}'"))
        })?;
        let path = self.server.config().paths.base_dir.join(filename);
        task.complete(Artifact::File(path));
        Ok(b"File correctly received".to_vec())
    }

    /// Worker aborted its integrity round: free the slot and surface the
    /// error through the waiting continuation.
    fn sync_error_from_worker(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        self.slots.release_integrity();
        self.deliver_task_error(payload)?;
        Ok(b"Error notified".to_vec())
    }

    /// Generic task abort from the worker: `task-id error`.
    fn cancel_task(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        self.deliver_task_error(payload)?;
        Ok(b"Task cancelled".to_vec())
    }

    fn deliver_task_error(&self, payload: &[u8]) -> Result<(), ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let (task_id, detail) = text.split_once(' ').unwrap_or((text.as_ref(), ""));
        if let Some(task) = self.tasks.get(task_id) {
            // Structured peer errors come back as themselves; free text is
            // the worker's abort reason
            let error = match ClusterError::from_json(detail) {
                ClusterError::Internal(raw) => ClusterError::SyncAborted(raw),
                decoded => decoded,
            };
            task.fail(error);
        } else {
            debug!(task_id, "error reported for an unknown task");
        }
        Ok(())
    }

    /// Forward a DAPI error to the local API client named in the payload.
    fn forward_dapi_error(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let (client, error) = text.split_once(' ').ok_or_else(|| {
            ClusterError::InvalidPayload("expected 'client-name error'".to_string())
        })?;
        self.server
            .local_clients()
            .deliver(client, codes::DAPI_ERR, error.as_bytes().to_vec())?;
        Ok(b"DAPI error forwarded to local API client".to_vec())
    }

    fn get_nodes(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let filter = parse_node_filter(payload)?;
        let nodes = self.server.get_connected_nodes(filter.as_deref());
        Ok(serde_json::to_vec(&nodes)?)
    }

    async fn get_health(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let filter = parse_node_filter(payload)?;
        let health = self.server.get_health(filter.as_deref()).await?;
        Ok(serde_json::to_vec(&health)?)
    }

    /// Open an inbound file at a safe relative path.
    fn new_file(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let relative = String::from_utf8_lossy(payload).into_owned();
        if !is_safe_relative(&relative) {
            return Err(ClusterError::InvalidPayload(format!(
                "unsafe inbound file path '{relative}'"
            )));
        }
        let path = self.server.config().paths.base_dir.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&path)?;
        self.in_files.lock().insert(
            relative,
            InboundFile {
                path,
                file,
                digest: md5::Context::new(),
            },
        );
        Ok(b"Ready to receive file".to_vec())
    }

    /// Append a chunk: `relative-path\0chunk`.
    fn file_upd(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let nul = payload.iter().position(|&b| b == 0).ok_or_else(|| {
            ClusterError::InvalidPayload("file chunk without a path separator".to_string())
        })?;
        let relative = String::from_utf8_lossy(&payload[..nul]).into_owned();
        let chunk = &payload[nul + 1..];
        let mut in_files = self.in_files.lock();
        let inbound = in_files.get_mut(&relative).ok_or_else(|| {
            ClusterError::InvalidPayload(format!("no inbound file open at '{relative}'"))
        })?;
        inbound.file.write_all(chunk)?;
        inbound.digest.consume(chunk);
        Ok(b"File chunk received".to_vec())
    }

    /// Close an inbound file and verify its digest: `relative-path md5`.
    fn file_end(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let (relative, expected) = text.split_once(' ').ok_or_else(|| {
            ClusterError::InvalidPayload("expected 'relative-path md5'".to_string())
        })?;
        let inbound = self.in_files.lock().remove(relative).ok_or_else(|| {
            ClusterError::InvalidPayload(format!("no inbound file open at '{relative}'"))
        })?;
        inbound.file.sync_all()?;
        let digest = format!("{:x}", inbound.digest.compute());
        if digest != expected {
            let _ = std::fs::remove_file(&inbound.path);
            return Err(ClusterError::InvalidPayload(format!(
                "digest mismatch for '{relative}'"
            )));
        }
        Ok(b"File correctly received".to_vec())
    }

    /// Store a string artifact, answering with its fresh id.
    fn new_str(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let id = new_request_id();
        self.in_str.lock().insert(id.clone(), payload.to_vec());
        Ok(id.into_bytes())
    }

    /// Connection teardown: abort continuations, fail in-flight requests,
    /// drop the registration.
    pub fn connection_lost(self: &Arc<Self>) {
        if let Some(name) = self.name() {
            info!(worker = %name, "Connection closed. Cancelling pending tasks");
            self.server.unregister_worker(&name, self);
        }
        self.tasks.cancel_all();
        self.link.fail_all();
        self.in_files.lock().clear();
        self.in_str.lock().clear();
    }

    /// Health projection of this worker.
    pub fn to_health(&self) -> Option<(String, NodeHealth)> {
        let info = self.info.lock().clone()?;
        let health = NodeHealth {
            info: NodeInfo {
                name: info.name.clone(),
                node_type: info.node_type,
                version: info.version,
                ip: self.peer_ip.clone(),
                n_active_agents: None,
            },
            status: Some(NodeStatus {
                sync_integrity_free: self.slots.integrity_free(),
                last_check_integrity: *self.integrity_check.lock(),
                last_sync_integrity: *self.integrity_sync.lock(),
                last_sync_agentinfo: *self.agent_info_sync.lock(),
                last_keep_alive: epoch_to_sync_time(self.last_keepalive()),
            }),
        };
        Some((info.name, health))
    }
}

fn epoch_to_sync_time(secs: u64) -> SyncTime {
    match chrono::DateTime::<Utc>::from_timestamp(secs as i64, 0) {
        Some(dt) => SyncTime::from(dt),
        None => SyncTime::never(),
    }
}

fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Node filters arrive as `{}` or `{"filter_node": ["w1", ...]}`.
fn parse_node_filter(payload: &[u8]) -> Result<Option<Vec<String>>, ClusterError> {
    if payload.is_empty() {
        return Ok(None);
    }
    #[derive(Deserialize, Default)]
    struct FilterArgs {
        #[serde(default)]
        filter_node: Option<Vec<String>>,
    }
    let args: FilterArgs = serde_json::from_slice(payload)?;
    Ok(args.filter_node)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
