// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAPI request execution and response correlation.
//!
//! `execute` runs a distributed API request on behalf of a local caller:
//! it allocates a request id, registers a waiter in the server's pending
//! table and routes the request over the right worker link. `process_dapi_res`
//! is the inbound half, waking the waiter (or forwarding to a local API
//! client) when the response arrives.

use super::session::WorkerSession;
use std::sync::Arc;
use tracing::debug;
use warden_core::{new_request_id, ClusterError};
use warden_wire::codes;

impl WorkerSession {
    /// Run a DAPI command and wait for its response.
    ///
    /// - `dapi_fwd`: `data` is `"<worker-name> <payload>"`; the request is
    ///   relayed to that worker's link.
    /// - `dapi`: the request goes out on this session's own link.
    /// - anything else dispatches locally through the command table.
    pub async fn execute(
        self: &Arc<Self>,
        command: &str,
        data: &[u8],
        wait_for_complete: bool,
    ) -> Result<String, ClusterError> {
        let request_id = new_request_id();
        let pending = self.server().pending_requests();
        let rx = pending.insert(&request_id);

        match command {
            codes::DAPI_FWD => {
                let text = String::from_utf8_lossy(data);
                let Some((client, request)) = text.split_once(' ') else {
                    pending.discard(&request_id);
                    return Err(ClusterError::InvalidPayload(
                        "expected '<worker-name> <payload>'".to_string(),
                    ));
                };
                let Some(target) = self.server().client(client) else {
                    pending.discard(&request_id);
                    return Err(ClusterError::WorkerNotFound(client.to_string()));
                };
                let payload = format!("{request_id} {request}");
                if let Err(e) = target
                    .link()
                    .send_request(codes::DAPI, payload.as_bytes())
                    .await
                {
                    pending.discard(&request_id);
                    return Err(e);
                }
            }
            codes::DAPI => {
                let mut payload = format!("{request_id} ").into_bytes();
                payload.extend_from_slice(data);
                if let Err(e) = self.link().send_request(codes::DAPI, &payload).await {
                    pending.discard(&request_id);
                    return Err(e);
                }
            }
            _ => {
                // Not a DAPI round-trip: run it through the command table now
                pending.discard(&request_id);
                let (ok, payload) = self.process_request(command, data).await;
                let text = String::from_utf8_lossy(&payload).into_owned();
                return if ok {
                    Ok(text)
                } else {
                    // The table serialized the error; recover it
                    Err(ClusterError::from_json(&text))
                };
            }
        }

        if wait_for_complete {
            rx.await
                .map_err(|_| ClusterError::Internal("master is shutting down".to_string()))
        } else {
            let timeout = self
                .server()
                .config()
                .intervals
                .communication
                .dapi_request();
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(ClusterError::Internal(
                    "master is shutting down".to_string(),
                )),
                // The entry stays in the table so the late response is
                // consumed and discarded when it finally arrives.
                Err(_) => Err(ClusterError::DapiTimeout),
            }
        }
    }

    /// Inbound `dapi_res`: `"<request-id> <string-id>"`.
    pub(crate) fn process_dapi_res(&self, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let text = String::from_utf8_lossy(payload);
        let (request_id, string_id) = text.split_once(' ').ok_or_else(|| {
            ClusterError::InvalidPayload("expected '<request-id> <string-id>'".to_string())
        })?;

        let pending = self.server().pending_requests();
        if pending.contains(request_id) {
            let raw = self.in_str.lock().remove(string_id).ok_or_else(|| {
                ClusterError::StringNotFound(string_id.to_string())
            })?;
            pending.resolve(request_id, String::from_utf8_lossy(&raw).into_owned());
            Ok(b"Forwarded response".to_vec())
        } else if self.server().local_clients().contains(request_id) {
            let raw = self.in_str.lock().remove(string_id).ok_or_else(|| {
                ClusterError::StringNotFound(string_id.to_string())
            })?;
            self.server()
                .local_clients()
                .deliver(request_id, codes::DAPI_RES, raw)?;
            debug!(request_id, "DAPI response forwarded to local API client");
            Ok(b"Response forwarded to local API client".to_vec())
        } else {
            Err(ClusterError::UnknownRequestId(request_id.to_string()))
        }
    }
}
