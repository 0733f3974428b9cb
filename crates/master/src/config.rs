// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master configuration, loaded from a TOML file.
//!
//! Every knob has a default so an empty file (or no file at all) yields a
//! runnable configuration.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
}

/// Top-level master configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub intervals: Intervals,
    pub paths: Paths,
    /// Per cluster-item-key file policy. Keys are relative directory
    /// prefixes such as `etc/shared/` or `queue/agent-groups/`.
    pub files: BTreeMap<String, FilePolicy>,
    pub agentdb: AgentDbConfig,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Policy for a cluster-item-key, falling back to the default policy.
    pub fn file_policy(&self, cluster_item_key: &str) -> FilePolicy {
        self.files.get(cluster_item_key).cloned().unwrap_or_default()
    }

    /// Staging directory for a worker: `<base>/queue/cluster/<name>/`.
    pub fn worker_dir(&self, worker_name: &str) -> PathBuf {
        self.paths
            .base_dir
            .join("queue")
            .join("cluster")
            .join(worker_name)
    }
}

/// Cluster identity. Workers must present the same cluster name and version.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    pub node_name: String,
    pub node_type: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "warden".to_string(),
            node_name: "master".to_string(),
            node_type: "master".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub master: MasterIntervals,
    pub communication: CommunicationIntervals,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterIntervals {
    /// Seconds between snapshot recomputations.
    pub recalculate_integrity: u64,
}

impl Default for MasterIntervals {
    fn default() -> Self {
        Self {
            recalculate_integrity: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommunicationIntervals {
    /// Seconds to wait for an inbound artifact.
    pub timeout_receiving_file: u64,
    /// Seconds to wait for a DAPI round-trip.
    pub timeout_dapi_request: u64,
    /// Seconds to wait for a plain request/response on the link.
    pub timeout_cluster_request: u64,
}

impl Default for CommunicationIntervals {
    fn default() -> Self {
        Self {
            timeout_receiving_file: 120,
            timeout_dapi_request: 200,
            timeout_cluster_request: 20,
        }
    }
}

impl CommunicationIntervals {
    pub fn receiving_file(&self) -> Duration {
        Duration::from_secs(self.timeout_receiving_file)
    }

    pub fn dapi_request(&self) -> Duration {
        Duration::from_secs(self.timeout_dapi_request)
    }

    pub fn cluster_request(&self) -> Duration {
        Duration::from_secs(self.timeout_cluster_request)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Root of the managed file tree.
    pub base_dir: PathBuf,
    /// Mode for per-worker staging directories.
    pub worker_dir_mode: u32,
    /// Owner applied by safe moves, when running privileged.
    pub owner_uid: Option<u32>,
    pub owner_gid: Option<u32>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/lib/warden"),
            worker_dir_mode: 0o750,
            owner_uid: None,
            owner_gid: None,
        }
    }
}

/// Policy for one cluster-item-key.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilePolicy {
    /// Mode applied when a file of this class is moved into place.
    pub permissions: u32,
    /// Whether worker-only files of this class are requested back from the
    /// worker (the extra-valid bucket) instead of being scheduled for
    /// deletion.
    pub extra_valid: bool,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            permissions: 0o660,
            extra_valid: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentDbConfig {
    /// Unix socket of the agent database service.
    pub socket: PathBuf,
}

impl Default for AgentDbConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/var/lib/warden/db/agentdb.sock"),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
