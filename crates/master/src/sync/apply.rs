// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Applying extra-valid files received from a worker.
//!
//! Every manifest entry is applied independently: failures become
//! [`ClusterError`]s and `ClusterError::is_warning` decides whether they
//! land in the warning or the error tally, keyed by cluster-item-key. The
//! pass never aborts on a single file. Merged containers are unmerged
//! lazily and their members applied one by one with a cooperative yield in
//! between, so DAPI traffic and keepalives keep flowing while a large
//! container lands.

use super::archive::{unmerge, ArchiveError};
use super::snapshot::{FileMetadata, FileTree};
use crate::config::FilePolicy;
use std::collections::{BTreeMap, HashSet};
use std::fs::FileTimes;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};
use warden_core::{parse_mtime, ClusterError};

/// Base name of the master credential file. Workers must never push it.
pub const CREDENTIAL_FILE: &str = "client.keys";

/// Everything the apply pass needs besides the manifest itself.
pub struct ApplyCtx<'a> {
    /// Root of the managed tree; destination paths are relative to it.
    pub base_dir: &'a Path,
    /// Per-worker staging area for temporary member files.
    pub worker_dir: &'a Path,
    pub policies: &'a BTreeMap<String, FilePolicy>,
    /// Owner applied on moved files, when configured.
    pub owner: Option<(u32, u32)>,
    /// Ids of agents known to the master; members of unknown agents are
    /// skipped.
    pub agent_ids: &'a HashSet<String>,
}

impl ApplyCtx<'_> {
    fn mode_for(&self, cluster_item_key: &str) -> u32 {
        self.policies
            .get(cluster_item_key)
            .map(|p| p.permissions)
            .unwrap_or_else(|| FilePolicy::default().permissions)
    }
}

/// Warning/error tallies keyed by cluster-item-key, plus the number of
/// extra-valid members actually applied.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied_extra_valid: u64,
    pub warnings: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, u64>,
}

impl ApplyOutcome {
    fn warn(&mut self, key: &str) {
        *self.warnings.entry(key.to_string()).or_insert(0) += 1;
    }

    fn error(&mut self, key: &str) {
        *self.errors.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Iterate the received manifest and update the local tree.
///
/// `on_member_applied` fires once per applied extra-valid member so the
/// session can keep its live status counter current.
pub async fn process_files_from_worker<F: Fn()>(
    ctx: &ApplyCtx<'_>,
    manifest: &FileTree,
    staging: &Path,
    on_member_applied: F,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for (name, meta) in manifest {
        match update_file(ctx, name, meta, staging, &mut outcome, &on_member_applied).await {
            Ok(()) => {}
            Err(e) if e.is_warning() => {
                debug!(file = %name, error = %e, "warning updating file from worker");
                outcome.warn(&meta.cluster_item_key);
            }
            Err(e) => {
                debug!(file = %name, error = %e, "error updating file from worker");
                outcome.error(&meta.cluster_item_key);
            }
        }
    }

    if outcome.errors.values().sum::<u64>() > 0 {
        let summary: Vec<String> = outcome
            .errors
            .iter()
            .map(|(key, count)| format!("{key}: {count}"))
            .collect();
        error!("Errors updating worker files: {}", summary.join(" | "));
    }
    for (key, count) in &outcome.warnings {
        warn!("Skipped {count} files of class {key} received from the worker");
    }

    outcome
}

async fn update_file<F: Fn()>(
    ctx: &ApplyCtx<'_>,
    name: &str,
    meta: &FileMetadata,
    staging: &Path,
    outcome: &mut ApplyOutcome,
    on_member_applied: &F,
) -> Result<(), ClusterError> {
    // Only the master's own credential file is valid.
    if Path::new(name).file_name().is_some_and(|n| n == CREDENTIAL_FILE) {
        warn!("Credential file received from a worker, refusing it");
        return Err(ClusterError::CredentialFileRefused);
    }

    if meta.merged {
        apply_merged(ctx, name, meta, staging, outcome, on_member_applied).await
    } else {
        let src = staging.join(name);
        let dest = ctx.base_dir.join(name);
        let mode = ctx.mode_for(&meta.cluster_item_key);
        safe_move(&src, &dest, mode, ctx.owner, None)?;
        Ok(())
    }
}

/// What became of one merged-container member that raised no error.
enum MemberOutcome {
    Applied,
    /// The destination already has a newer copy.
    SkippedOlder,
}

async fn apply_merged<F: Fn()>(
    ctx: &ApplyCtx<'_>,
    name: &str,
    meta: &FileMetadata,
    staging: &Path,
    outcome: &mut ApplyOutcome,
    on_member_applied: &F,
) -> Result<(), ClusterError> {
    let container = std::fs::read(staging.join(name))?;
    let mode = ctx.mode_for(&meta.cluster_item_key);

    for member in unmerge(&container) {
        match member {
            Ok(member) => match apply_member(ctx, &member.path, member.data, &member.mtime, mode) {
                Ok(MemberOutcome::Applied) => {
                    outcome.applied_extra_valid += 1;
                    on_member_applied();
                }
                Ok(MemberOutcome::SkippedOlder) => {
                    debug!(member = %member.path, "destination is newer, skipping member");
                }
                Err(e) if e.is_warning() => {
                    debug!(member = %member.path, error = %e, "skipping member");
                    outcome.warn(&meta.cluster_item_key);
                }
                Err(e) => {
                    error!(member = %member.path, error = %e, "error applying member");
                    outcome.error(&meta.cluster_item_key);
                }
            },
            Err(e @ ArchiveError::Malformed(_)) => {
                // The container is unreadable past this point
                error!(file = %name, error = %e, "merged container is malformed");
                outcome.error(&meta.cluster_item_key);
                break;
            }
            Err(e) => {
                error!(file = %name, error = %e, "error reading merged container");
                outcome.error(&meta.cluster_item_key);
                break;
            }
        }
        // Let other tasks (DAPI, keepalives) run between members
        tokio::task::yield_now().await;
    }
    Ok(())
}

fn apply_member(
    ctx: &ApplyCtx<'_>,
    member_path: &str,
    data: &[u8],
    mtime: &str,
    mode: u32,
) -> Result<MemberOutcome, ClusterError> {
    let basename = Path::new(member_path)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ClusterError::InvalidPayload(format!("member path '{member_path}' has no file name"))
        })?;

    // Members are named after the agent they belong to
    if !ctx.agent_ids.contains(basename) {
        return Err(ClusterError::UnknownAgent(basename.to_string()));
    }

    let parsed =
        parse_mtime(mtime).map_err(|e| ClusterError::InvalidPayload(e.to_string()))?;
    let member_secs = parsed.and_utc().timestamp();

    let dest = ctx.base_dir.join(member_path);
    if let Ok(meta) = std::fs::metadata(&dest) {
        let local_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        if local_secs >= member_secs {
            return Ok(MemberOutcome::SkippedOlder);
        }
    }

    let tmp = ctx.worker_dir.join(basename);
    std::fs::write(&tmp, data)?;

    let micros = parsed.and_utc().timestamp_subsec_micros();
    let times = UNIX_EPOCH + Duration::new(member_secs.max(0) as u64, micros * 1000);
    safe_move(&tmp, &dest, mode, ctx.owner, Some(times))?;
    Ok(MemberOutcome::Applied)
}

/// Move `src` to `dest`, then apply mode, owner and timestamps.
///
/// Rename first, copy+remove as the cross-device fallback.
pub fn safe_move(
    src: &Path,
    dest: &Path,
    mode: u32,
    owner: Option<(u32, u32)>,
    times: Option<SystemTime>,
) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(src, dest).is_err() {
        std::fs::copy(src, dest)?;
        std::fs::remove_file(src)?;
    }
    // Timestamps before permissions: the policy mode may drop write access
    if let Some(when) = times {
        let file = std::fs::File::options().write(true).open(dest)?;
        file.set_times(FileTimes::new().set_accessed(when).set_modified(when))?;
    }
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))?;
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(dest, Some(uid), Some(gid))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
