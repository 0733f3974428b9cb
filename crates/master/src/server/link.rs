// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound half of a worker link.
//!
//! Requests carry a fresh correlation id and register a waiter; the
//! connection read loop feeds responses back through
//! [`Link::resolve_response`]. The link also implements the chunked
//! send-file facility used by the integrity push.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;
use tracing::debug;
use warden_core::ClusterError;
use warden_wire::{codes, write_frame, Frame};

/// Bytes per `file_upd` chunk.
const FILE_CHUNK: usize = 64 * 1024;

type ResponseSlot = (bool, Vec<u8>);

pub struct Link {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<ResponseSlot>>>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl Link {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>, request_timeout: Duration) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            request_timeout,
        }
    }

    /// Send a command and wait for the peer's correlated response.
    pub async fn send_request(
        &self,
        command: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ClusterError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);

        let frame = Frame::Request {
            id,
            command: command.to_string(),
            payload: payload.to_vec(),
        };
        if let Err(e) = write_frame(&mut *self.writer.lock().await, &frame).await {
            self.waiters.lock().remove(&id);
            return Err(ClusterError::Internal(e.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok((true, payload))) => Ok(payload),
            // Error responses carry the peer's serialized error; anything
            // unstructured falls back to a generic cluster error
            Ok(Ok((false, payload))) => Err(ClusterError::from_json(&String::from_utf8_lossy(
                &payload,
            ))),
            Ok(Err(_)) => Err(ClusterError::Internal(
                "link closed while waiting for a response".to_string(),
            )),
            Err(_) => {
                self.waiters.lock().remove(&id);
                Err(ClusterError::RequestFailed(format!(
                    "timed out waiting for the response to '{command}'"
                )))
            }
        }
    }

    /// Answer an inbound request.
    pub async fn respond(&self, id: u64, ok: bool, payload: Vec<u8>) -> Result<(), ClusterError> {
        let frame = Frame::Response { id, ok, payload };
        write_frame(&mut *self.writer.lock().await, &frame)
            .await
            .map_err(|e| ClusterError::Internal(e.to_string()))
    }

    /// Deliver a response frame read off the connection.
    pub fn resolve_response(&self, id: u64, ok: bool, payload: Vec<u8>) {
        match self.waiters.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send((ok, payload));
            }
            None => debug!(id, "response for an unknown or abandoned request"),
        }
    }

    /// Fail every in-flight request (connection lost).
    pub fn fail_all(&self) {
        for (_, tx) in self.waiters.lock().drain() {
            let _ = tx.send((false, b"connection lost".to_vec()));
        }
    }

    /// Stream a file to the peer in chunks, closing with its digest.
    pub async fn send_file(&self, path: &Path, relative: &str) -> Result<u64, ClusterError> {
        self.send_request(codes::NEW_FILE, relative.as_bytes())
            .await?;

        let mut file = tokio::fs::File::open(path).await?;
        let mut context = md5::Context::new();
        let mut sent = 0u64;
        let mut chunk = vec![0u8; FILE_CHUNK];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            context.consume(&chunk[..n]);
            let mut payload = Vec::with_capacity(relative.len() + 1 + n);
            payload.extend_from_slice(relative.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&chunk[..n]);
            self.send_request(codes::FILE_UPD, &payload).await?;
            sent += n as u64;
        }

        let digest = format!("{:x}", context.compute());
        self.send_request(codes::FILE_END, format!("{relative} {digest}").as_bytes())
            .await?;
        Ok(sent)
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
