// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The integrity differ.
//!
//! Classifies a worker's file tree against the master snapshot into four
//! disjoint buckets:
//!
//! - `missing` — the master has it, the worker does not (push to worker);
//! - `shared` — both have it but the content differs (master wins);
//! - `extra` — the worker has it, the master does not want it;
//! - `extra_valid` — the worker has it and the master wants it back
//!   (classes configured with `extra_valid = true`).

use super::snapshot::FileTree;
use crate::config::FilePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four-bucket classification shipped in the sync manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub missing: FileTree,
    pub shared: FileTree,
    pub extra: FileTree,
    pub extra_valid: FileTree,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.shared.is_empty()
            && self.extra.is_empty()
            && self.extra_valid.is_empty()
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            missing: self.missing.len() as u64,
            shared: self.shared.len() as u64,
            extra: self.extra.len() as u64,
            extra_valid: self.extra_valid.len() as u64,
        }
    }
}

/// Bucket sizes, kept in the integrity-sync status record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub missing: u64,
    pub shared: u64,
    pub extra: u64,
    pub extra_valid: u64,
}

/// Compare the worker's metadata against the master snapshot.
pub fn compare_files(
    master: &FileTree,
    worker: &FileTree,
    policies: &BTreeMap<String, FilePolicy>,
) -> (FileDiff, DiffCounts) {
    let mut diff = FileDiff::default();

    for (path, meta) in master {
        if !worker.contains_key(path) {
            diff.missing.insert(path.clone(), meta.clone());
        }
    }

    for (path, worker_meta) in worker {
        match master.get(path) {
            Some(master_meta) => {
                if master_meta.md5 != worker_meta.md5 {
                    diff.shared.insert(path.clone(), master_meta.clone());
                }
            }
            None => {
                let extra_valid = policies
                    .get(&worker_meta.cluster_item_key)
                    .map(|p| p.extra_valid)
                    .unwrap_or(false);
                if extra_valid {
                    diff.extra_valid.insert(path.clone(), worker_meta.clone());
                } else {
                    diff.extra.insert(path.clone(), worker_meta.clone());
                }
            }
        }
    }

    let counts = diff.counts();
    (diff, counts)
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
