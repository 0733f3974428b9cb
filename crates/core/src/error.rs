// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster error taxonomy.
//!
//! Errors that cross the worker link are serialized with a stable JSON
//! encoding so both peers agree on the shape regardless of version skew.
//! Infrastructure failures that have no dedicated variant travel as
//! `Internal` carrying the original message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the cluster synchronization protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ClusterError {
    /// The worker's cluster name does not match the master's. Fatal for the
    /// connection.
    #[error("worker belongs to a different cluster, connection rejected")]
    WrongClusterName,

    /// The worker's version does not match the master's. Fatal for the
    /// connection.
    #[error("worker runs an incompatible version, connection rejected")]
    WrongVersion,

    /// A worker name is already registered or malformed.
    #[error("could not register worker: {0}")]
    InvalidWorkerName(String),

    /// Forward target of a `dapi_fwd` request is not connected.
    #[error("worker '{0}' is not connected")]
    WorkerNotFound(String),

    /// `dapi_res` carried a request id nobody is waiting for.
    #[error("no pending request with id '{0}'")]
    UnknownRequestId(String),

    /// No DAPI response arrived within `timeout_dapi_request`.
    #[error("timed out waiting for a distributed API response")]
    DapiTimeout,

    /// No inbound artifact arrived within `timeout_receiving_file`.
    #[error("timed out waiting for a file from the peer")]
    ReceiveTimeout,

    /// The string artifact for a task id is missing from the registry.
    #[error("expected a received string under task id '{0}', but it is empty")]
    StringNotFound(String),

    /// A payload could not be decoded (malformed JSON, bad field split).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Workers must never push the master credential file.
    #[error("credential file received from a worker, refusing to apply it")]
    CredentialFileRefused,

    /// A merged-container member names an agent the master does not know.
    #[error("member belongs to a non-existent agent '{0}'")]
    UnknownAgent(String),

    /// The peer answered a request with an error status.
    #[error("request failed on the peer: {0}")]
    RequestFailed(String),

    /// The worker aborted a sync round and reported why.
    #[error("sync aborted by the worker: {0}")]
    SyncAborted(String),

    /// Anything else, wrapped with its original message.
    #[error("{0}")]
    Internal(String),
}

impl ClusterError {
    /// Stable JSON encoding used when shipping an error to the peer.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"kind":"Internal","detail":"unencodable error"}"#.to_string())
    }

    /// Decode a peer error; anything unrecognizable becomes `Internal` so a
    /// skewed peer cannot break the caller.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self::Internal(raw.to_string()))
    }

    /// Domain refusals count as warnings in the file-apply tallies;
    /// everything else counts as an error.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::CredentialFileRefused | Self::UnknownAgent(_))
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
