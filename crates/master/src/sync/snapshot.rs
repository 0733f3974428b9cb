// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master file-tree metadata.
//!
//! The snapshot maps relative file paths to their metadata and is recomputed
//! periodically by the server's snapshot loop. Sessions capture a handle for
//! the duration of a diff; they never see a half-updated tree.

use crate::config::FilePolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Metadata of one managed file, as carried in `files_metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub md5: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_name: Option<String>,
    pub cluster_item_key: String,
}

impl FileMetadata {
    pub fn plain(md5: impl Into<String>, cluster_item_key: impl Into<String>) -> Self {
        Self {
            md5: md5.into(),
            merged: false,
            merge_type: None,
            merge_name: None,
            cluster_item_key: cluster_item_key.into(),
        }
    }
}

/// Relative path → metadata for every managed file.
pub type FileTree = HashMap<String, FileMetadata>;

/// Walk the managed subtrees under `base_dir` and compute fresh metadata.
///
/// One subtree per configured cluster-item-key. Unreadable entries are
/// logged and skipped so a single bad file cannot starve the cluster of
/// snapshots. Blocking; run on the blocking pool.
pub fn scan_file_tree(base_dir: &Path, policies: &BTreeMap<String, FilePolicy>) -> FileTree {
    let mut tree = FileTree::new();
    for item_key in policies.keys() {
        let root = base_dir.join(item_key);
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(item_key = %item_key, error = %e, "skipping unreadable entry during snapshot scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(base_dir) else {
                continue;
            };
            let relative = relative.to_string_lossy().into_owned();
            match std::fs::read(entry.path()) {
                Ok(bytes) => {
                    let digest = format!("{:x}", md5::compute(&bytes));
                    tree.insert(relative, FileMetadata::plain(digest, item_key.clone()));
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e,
                        "skipping unreadable file during snapshot scan");
                }
            }
        }
    }
    tree
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
