// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master server.
//!
//! Owns the published snapshot, the pending DAPI table, the per-cycle
//! integrity gate, the worker registry and the DAPI/SendSync queues.
//! Connections are accepted in a spawned task each; the per-connection read
//! loop dispatches commands to a [`WorkerSession`].

mod agent_info;
mod dapi;
pub mod health;
mod integrity;
mod link;
mod session;

pub use link::Link;
pub use session::{
    AgentInfoSyncStatus, IntegrityCheckStatus, IntegritySyncStatus, WorkerSession,
};

use crate::adapters::{AgentDb, LocalClients};
use crate::config::Config;
use crate::sync::pending::PendingRequests;
use crate::sync::snapshot::{scan_file_tree, FileTree};
use health::{HealthDocument, NodeHealth, NodeInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use warden_core::{Clock, ClusterError, SystemClock};
use warden_wire::{codes, read_frame, Frame, ProtocolError};

/// A request pulled off a worker link for a server-side queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub node: String,
    pub payload: Vec<u8>,
}

/// Unbounded queue fed by worker sessions, drained by the embedding layer.
struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedRequest>>>,
}

impl RequestQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn add(&self, node: &str, payload: Vec<u8>) {
        let _ = self.tx.send(QueuedRequest {
            node: node.to_string(),
            payload,
        });
    }

    fn take(&self) -> Option<mpsc::UnboundedReceiver<QueuedRequest>> {
        self.rx.lock().take()
    }
}

/// The multi-worker master server.
pub struct Master {
    config: Config,
    version: String,
    clock: Arc<dyn Clock>,
    snapshot: Mutex<Arc<FileTree>>,
    pending: PendingRequests,
    integrity_already_executed: Mutex<HashSet<String>>,
    clients: Mutex<HashMap<String, Arc<WorkerSession>>>,
    local_clients: LocalClients,
    agentdb: Arc<dyn AgentDb>,
    dapi_queue: RequestQueue,
    sendsync_queue: RequestQueue,
    shutdown: CancellationToken,
}

impl Master {
    pub fn new(config: Config, agentdb: Arc<dyn AgentDb>) -> Arc<Self> {
        Self::with_clock(config, agentdb, Arc::new(SystemClock))
    }

    /// Build a master on an explicit clock (fake clocks in tests).
    pub fn with_clock(
        config: Config,
        agentdb: Arc<dyn AgentDb>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            clock,
            snapshot: Mutex::new(Arc::new(FileTree::new())),
            pending: PendingRequests::new(),
            integrity_already_executed: Mutex::new(HashSet::new()),
            clients: Mutex::new(HashMap::new()),
            local_clients: LocalClients::new(),
            agentdb,
            dapi_queue: RequestQueue::new(),
            sendsync_queue: RequestQueue::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn agentdb(&self) -> &Arc<dyn AgentDb> {
        &self.agentdb
    }

    pub fn local_clients(&self) -> &LocalClients {
        &self.local_clients
    }

    pub fn pending_requests(&self) -> &PendingRequests {
        &self.pending
    }

    /// Current published snapshot. Callers hold the handle for the whole
    /// diff; publications never mutate an already-captured tree.
    pub fn snapshot(&self) -> Arc<FileTree> {
        Arc::clone(&self.snapshot.lock())
    }

    pub fn publish_snapshot(&self, tree: FileTree) {
        *self.snapshot.lock() = Arc::new(tree);
    }

    /// First integrity probe of a worker in the current snapshot cycle wins;
    /// repeats are refused until the loop clears the set.
    pub fn grant_integrity_probe(&self, worker: &str) -> bool {
        self.integrity_already_executed
            .lock()
            .insert(worker.to_string())
    }

    pub fn clear_integrity_executed(&self) {
        self.integrity_already_executed.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn integrity_executed_count(&self) -> usize {
        self.integrity_already_executed.lock().len()
    }

    /// Register a worker by its unique name.
    pub fn register_worker(
        &self,
        name: &str,
        session: &Arc<WorkerSession>,
    ) -> Result<(), ClusterError> {
        if name.is_empty() {
            return Err(ClusterError::InvalidWorkerName(
                "worker name is empty".to_string(),
            ));
        }
        if name == self.config.cluster.node_name {
            return Err(ClusterError::InvalidWorkerName(format!(
                "'{name}' is the master's own name"
            )));
        }
        let mut clients = self.clients.lock();
        if clients.contains_key(name) {
            return Err(ClusterError::InvalidWorkerName(format!(
                "worker '{name}' is already connected"
            )));
        }
        clients.insert(name.to_string(), Arc::clone(session));
        Ok(())
    }

    /// Drop a worker registration, but only for the session that owns it.
    pub fn unregister_worker(&self, name: &str, session: &Arc<WorkerSession>) {
        let mut clients = self.clients.lock();
        if clients
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            clients.remove(name);
        }
    }

    pub fn client(&self, name: &str) -> Option<Arc<WorkerSession>> {
        self.clients.lock().get(name).cloned()
    }

    pub fn enqueue_dapi(&self, node: &str, payload: Vec<u8>) {
        self.dapi_queue.add(node, payload);
    }

    pub fn enqueue_sendsync(&self, node: &str, payload: Vec<u8>) {
        self.sendsync_queue.add(node, payload);
    }

    /// Stream of queued DAPI requests, takeable once by the local API layer.
    pub fn take_dapi_requests(&self) -> Option<mpsc::UnboundedReceiver<QueuedRequest>> {
        self.dapi_queue.take()
    }

    /// Stream of queued SendSync requests, takeable once.
    pub fn take_sendsync_requests(&self) -> Option<mpsc::UnboundedReceiver<QueuedRequest>> {
        self.sendsync_queue.take()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Periodic snapshot loop. Scans run one at a time on the blocking
    /// pool; each publication also re-arms the per-cycle integrity gate.
    pub async fn file_status_update(self: Arc<Self>) {
        let span = tracing::info_span!("Local integrity");
        async {
            loop {
                let before = self.clock.now();
                info!("Starting.");
                let config = self.config.clone();
                match tokio::task::spawn_blocking(move || {
                    scan_file_tree(&config.paths.base_dir, &config.files)
                })
                .await
                {
                    Ok(tree) => {
                        let count = tree.len();
                        self.publish_snapshot(tree);
                        self.clear_integrity_executed();
                        info!(
                            "Finished in {:.3}s. Calculated metadata of {count} files.",
                            self.clock.now().duration_since(before).as_secs_f64()
                        );
                    }
                    Err(e) => error!("Error calculating local file integrity: {e}"),
                }

                let period =
                    Duration::from_secs(self.config.intervals.master.recalculate_integrity);
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Accept loop: one spawned handler per worker connection.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        info!("Master listening for worker connections");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let master = Arc::clone(&self);
                        tokio::spawn(async move {
                            handle_connection(master, stream, addr.ip().to_string()).await;
                        });
                    }
                    Err(e) => error!("Accept error: {e}"),
                }
            }
        }
    }

    /// Basic info of the master plus every connected worker.
    pub fn get_connected_nodes(&self, filter: Option<&[String]>) -> BTreeMap<String, NodeInfo> {
        let keep = |name: &str| match filter {
            None => true,
            Some(names) if names.is_empty() => true,
            Some(names) => names.iter().any(|n| n == name),
        };

        let mut nodes = BTreeMap::new();
        if keep(&self.config.cluster.node_name) {
            nodes.insert(self.config.cluster.node_name.clone(), self.own_info());
        }
        for (name, session) in self.clients.lock().iter() {
            if !keep(name) {
                continue;
            }
            if let Some((name, health)) = session.to_health() {
                nodes.insert(name, health.info);
            }
        }
        nodes
    }

    /// Assemble the health document: per-worker sync status plus the master
    /// entry, each annotated with its active agent count.
    pub async fn get_health(
        &self,
        filter: Option<&[String]>,
    ) -> Result<HealthDocument, ClusterError> {
        let keep = |name: &str| match filter {
            None => true,
            Some(names) if names.is_empty() => true,
            Some(names) => names.iter().any(|n| n == name),
        };

        let sessions: Vec<Arc<WorkerSession>> = self.clients.lock().values().cloned().collect();
        let mut nodes = BTreeMap::new();
        for session in sessions {
            let Some((name, health)) = session.to_health() else {
                continue;
            };
            if keep(&name) {
                nodes.insert(name, health);
            }
        }
        let n_connected_nodes = nodes.len();

        let master_name = self.config.cluster.node_name.clone();
        if keep(&master_name) {
            nodes.insert(
                master_name,
                NodeHealth {
                    info: self.own_info(),
                    status: None,
                },
            );
        }

        for (name, node) in nodes.iter_mut() {
            node.info.n_active_agents = Some(self.agentdb.active_agents(name).await?);
        }

        Ok(HealthDocument {
            n_connected_nodes,
            nodes,
        })
    }

    fn own_info(&self) -> NodeInfo {
        NodeInfo {
            name: self.config.cluster.node_name.clone(),
            node_type: self.config.cluster.node_type.clone(),
            version: self.version.clone(),
            ip: String::new(),
            n_active_agents: None,
        }
    }
}

/// Per-connection loop: read frames, dispatch requests in order, route
/// responses to their waiters. Teardown cancels the session's tasks.
pub async fn handle_connection(master: Arc<Master>, stream: TcpStream, peer_ip: String) {
    let (mut reader, writer) = stream.into_split();
    let request_timeout = master.config().intervals.communication.cluster_request();
    let shutdown = master.shutdown_token().clone();
    let session = WorkerSession::new(
        master,
        Link::new(Box::new(writer), request_timeout),
        peer_ip,
    );

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Frame::Request {
                id,
                command,
                payload,
            }) => {
                let (ok, response) = session.process_request(&command, &payload).await;
                let fatal_hello = command == codes::HELLO && !ok;
                if let Err(e) = session.link().respond(id, ok, response).await {
                    debug!("Could not answer the worker: {e}");
                    break;
                }
                if fatal_hello {
                    warn!("Worker rejected at hello, closing the connection");
                    break;
                }
            }
            Ok(Frame::Response { id, ok, payload }) => {
                session.link().resolve_response(id, ok, payload);
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("Worker disconnected");
                break;
            }
            Err(e) => {
                warn!("Connection error: {e}");
                break;
            }
        }
    }
    session.connection_lost();
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
