// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integrity and extra-valid sync continuations.
//!
//! `sync_integrity` waits for the worker's metadata archive, diffs it
//! against the published snapshot and either answers "no sync required" or
//! pushes an archive of missing/shared files plus the bucket manifest.
//! `sync_extra_valid` waits for the worker's follow-up archive and applies
//! it to the local tree.

use super::session::WorkerSession;
use crate::sync::apply::{self, ApplyCtx};
use crate::sync::archive;
use crate::sync::diff::compare_files;
use crate::sync::receive::Artifact;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, Instrument};
use warden_core::{ClusterError, SyncTime};
use warden_wire::codes;

type ArtifactResult = Result<Artifact, ClusterError>;

impl WorkerSession {
    /// Wait for the announced artifact, honoring `timeout_receiving_file`.
    async fn wait_for_file(
        &self,
        rx: oneshot::Receiver<ArtifactResult>,
    ) -> Result<PathBuf, ClusterError> {
        let timeout = self
            .server()
            .config()
            .intervals
            .communication
            .receiving_file();
        debug!("Waiting to receive zip file from worker.");
        let artifact = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| ClusterError::ReceiveTimeout)?
            .map_err(|_| {
                ClusterError::Internal("receive task dropped before completion".to_string())
            })??;
        match artifact {
            Artifact::File(path) => {
                debug!(file = %path.display(), "Received file from worker");
                Ok(path)
            }
            Artifact::Str(id) => Err(ClusterError::Internal(format!(
                "expected a file artifact, got string '{id}'"
            ))),
        }
    }

    /// Continuation for `syn_i_w_m`.
    pub(crate) async fn sync_integrity(
        self: &Arc<Self>,
        task_id: &str,
        rx: oneshot::Receiver<ArtifactResult>,
    ) -> Result<(), ClusterError> {
        let name = self.require_name()?;
        let date_start = SyncTime::from(self.server().clock().utc_now());

        let received = self.wait_for_file(rx).await?;
        let decompressed = archive::decompress_files::<crate::sync::snapshot::FileTree>(&received);
        let _ = std::fs::remove_file(&received);
        let (worker_manifest, staging) =
            decompressed.map_err(|e| ClusterError::Internal(e.to_string()))?;
        // The integrity check needs only the manifest
        let _ = std::fs::remove_dir_all(&staging);
        info!(
            "Starting. Received metadata of {} files.",
            worker_manifest.len()
        );

        let snapshot = self.server().snapshot();
        let config = self.server().config();
        let (diff, counts) = compare_files(&snapshot, &worker_manifest, &config.files);

        let date_end = SyncTime::from(self.server().clock().utc_now());
        {
            let mut status = self.integrity_check.lock();
            status.date_start_master = date_start;
            status.date_end_master = date_end;
        }
        let elapsed = date_end.secs_since(date_start);

        if diff.is_empty() {
            info!("Finished in {elapsed:.3}s. Sync not required.");
            self.link().send_request(codes::SYNC_OK, b"").await?;
            return Ok(());
        }
        info!("Finished in {elapsed:.3}s. Sync required.");

        self.slots
            .set_extra_valid_requested(!diff.extra_valid.is_empty());
        {
            let mut status = self.integrity_sync.lock();
            status.tmp_date_start_master = SyncTime::from(self.server().clock().utc_now());
            status.total_files = counts;
            status.total_extra_valid = 0;
        }

        let push = async {
            info!("Starting.");
            info!(
                "Files to create in worker: {} | Files to update in worker: {} | \
                 Files to delete in worker: {} | Files to receive: {}",
                diff.missing.len(),
                diff.shared.len(),
                diff.extra.len(),
                diff.extra_valid.len()
            );

            debug!("Compressing files to be synced in worker.");
            let archive_path = config
                .worker_dir(&name)
                .join(format!("master-files-{task_id}.bundle"));
            let to_send: BTreeSet<String> = diff
                .missing
                .keys()
                .chain(diff.shared.keys())
                .cloned()
                .collect();
            archive::compress_files(&archive_path, &config.paths.base_dir, &to_send, &diff)
                .map_err(|e| ClusterError::Internal(e.to_string()))?;

            let result = self.push_archive(&archive_path).await;
            // The local archive goes away on every path
            let _ = std::fs::remove_file(&archive_path);
            debug!("Finished sending files to worker.");

            if !self.slots.extra_valid_requested() {
                let mut status = self.integrity_sync.lock();
                status.date_end_master = SyncTime::from(self.server().clock().utc_now());
                status.date_start_master = status.tmp_date_start_master;
                info!(
                    "Finished in {:.3}s.",
                    status.date_end_master.secs_since(status.tmp_date_start_master)
                );
            }
            result
        };
        push.instrument(tracing::info_span!("Integrity sync", worker = %name))
            .await
    }

    /// Push the archive: begin, stream, end; on failure notify the worker
    /// with the serialized error.
    async fn push_archive(self: &Arc<Self>, archive_path: &Path) -> Result<(), ClusterError> {
        let base_dir = &self.server().config().paths.base_dir;
        let relative = archive_path
            .strip_prefix(base_dir)
            .unwrap_or(archive_path)
            .to_string_lossy()
            .into_owned();

        let push_id = match self.link().send_request(codes::SYNC_PUSH_BEGIN, b"").await {
            Ok(payload) => String::from_utf8_lossy(&payload).into_owned(),
            Err(e) => {
                error!(error = %e, "Error sending files information");
                self.notify_push_error("None", &e).await;
                return Err(e);
            }
        };

        debug!("Zip with files to be synced sent to worker.");
        if let Err(e) = self.link().send_file(archive_path, &relative).await {
            error!(error = %e, "Error sending files information");
            self.notify_push_error(&push_id, &e).await;
            return Err(e);
        }

        match self
            .link()
            .send_request(
                codes::SYNC_PUSH_END,
                format!("{push_id} {relative}").as_bytes(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = %e, "Error sending files information");
                self.notify_push_error(&push_id, &e).await;
                Err(e)
            }
        }
    }

    async fn notify_push_error(self: &Arc<Self>, push_id: &str, error: &ClusterError) {
        let payload = format!("{push_id} {}", error.to_json());
        if let Err(e) = self
            .link()
            .send_request(codes::SYNC_PUSH_ERROR, payload.as_bytes())
            .await
        {
            debug!(error = %e, "could not notify the worker of the push failure");
        }
    }

    /// Continuation for `syn_e_w_m`.
    pub(crate) async fn sync_extra_valid(
        self: &Arc<Self>,
        _task_id: &str,
        rx: oneshot::Receiver<ArtifactResult>,
    ) -> Result<(), ClusterError> {
        let name = self.require_name()?;
        let config = self.server().config();

        let received = self.wait_for_file(rx).await?;
        let decompressed = archive::decompress_files::<crate::sync::snapshot::FileTree>(&received);
        let _ = std::fs::remove_file(&received);
        let (manifest, staging) =
            decompressed.map_err(|e| ClusterError::Internal(e.to_string()))?;
        debug!("Received {} files to check.", manifest.len());

        let agent_ids = match self.server().agentdb().agent_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, "Error getting agent ids");
                HashSet::new()
            }
        };
        let worker_dir = config.worker_dir(&name);
        let ctx = ApplyCtx {
            base_dir: &config.paths.base_dir,
            worker_dir: &worker_dir,
            policies: &config.files,
            owner: config.paths.owner_uid.zip(config.paths.owner_gid),
            agent_ids: &agent_ids,
        };
        apply::process_files_from_worker(&ctx, &manifest, &staging, || {
            self.integrity_sync.lock().total_extra_valid += 1;
        })
        .await;
        // Staging goes away on all exit paths; apply itself never aborts
        let _ = std::fs::remove_dir_all(&staging);

        let mut status = self.integrity_sync.lock();
        status.date_end_master = SyncTime::from(self.server().clock().utc_now());
        info!(
            "Finished in {:.3}s.",
            status.date_end_master.secs_since(status.tmp_date_start_master)
        );
        status.date_start_master = status.tmp_date_start_master;
        Ok(())
    }
}
