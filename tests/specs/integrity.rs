// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integrity sync specs: permission probes, the no-sync fast path, and the
//! full missing + extra-valid exchange.

use crate::prelude::*;
use std::collections::HashMap;
use warden_master::sync::archive::merge;
use warden_master::sync::diff::FileDiff;
use warden_master::sync::snapshot::{FileMetadata, FileTree};
use warden_wire::codes;

fn md5_of(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

fn plain(content: &[u8]) -> FileMetadata {
    FileMetadata::plain(md5_of(content), "etc/shared/")
}

/// Worker metadata identical to the master snapshot: the master answers
/// `syn_m_c_ok` and the slot frees without any push.
#[tokio::test]
async fn identical_trees_need_no_sync() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let mut tree = FileTree::new();
    tree.insert("etc/shared/agent.conf".to_string(), plain(b"conf"));
    cluster.master.publish_snapshot(tree.clone());

    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"True"
    );
    let task_id = worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;
    let task_id = String::from_utf8(task_id).unwrap();

    let scratch = tempfile::tempdir().unwrap();
    let bundle = build_bundle(scratch.path(), &tree, &[]);
    let relative = "queue/cluster/w1/integrity.bundle";
    worker.upload(relative, &bundle).await;
    worker
        .request_ok(
            codes::SYNC_INTEGRITY_END,
            format!("{task_id} {relative}").as_bytes(),
        )
        .await;

    // No sync required: empty body, no archive push
    let (id, command, payload) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_OK);
    assert!(payload.is_empty());
    worker.respond(id, true, b"ok").await;

    // A fresh cycle grants again once the round closes: no extra-valid was
    // requested, so the slot frees on its own
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        cluster.master.clear_integrity_executed();
        let granted = worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await;
        if granted == b"True" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "integrity slot never freed after the no-sync round"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// Master-only files are pushed; worker-only extra-valid files are
/// requested back, unmerged and applied under the configured policy.
#[tokio::test]
async fn missing_files_are_pushed_and_extra_valid_files_return() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    cluster.seed_file("etc/shared/a.conf", b"alpha");
    cluster.seed_file("etc/shared/b.conf", b"beta");
    let mut master_tree = FileTree::new();
    master_tree.insert("etc/shared/a.conf".to_string(), plain(b"alpha"));
    master_tree.insert("etc/shared/b.conf".to_string(), plain(b"beta"));
    cluster.master.publish_snapshot(master_tree);

    let mut worker_tree = FileTree::new();
    worker_tree.insert("etc/shared/a.conf".to_string(), plain(b"alpha"));
    worker_tree.insert(
        "queue/agent-groups/groups.mg".to_string(),
        FileMetadata {
            md5: "mg".to_string(),
            merged: true,
            merge_type: Some("agent-groups".to_string()),
            merge_name: Some("groups.mg".to_string()),
            cluster_item_key: "queue/agent-groups/".to_string(),
        },
    );

    let scratch = tempfile::tempdir().unwrap();
    let task_id = worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;
    let task_id = String::from_utf8(task_id).unwrap();
    let bundle = build_bundle(scratch.path(), &worker_tree, &[]);
    worker.upload("queue/cluster/w1/integrity.bundle", &bundle).await;
    worker
        .request_ok(
            codes::SYNC_INTEGRITY_END,
            format!("{task_id} queue/cluster/w1/integrity.bundle").as_bytes(),
        )
        .await;

    // Push session: begin, archive stream, end
    let (id, command, _) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_PUSH_BEGIN);
    worker.respond(id, true, b"wtask-7").await;

    let (_, pushed) = worker.receive_push().await;

    let (id, command, payload) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_PUSH_END);
    let text = String::from_utf8(payload).unwrap();
    assert!(text.starts_with("wtask-7 "), "push end payload: {text}");
    worker.respond(id, true, b"ok").await;

    // The archive carries the missing file plus the bucket manifest
    let (manifest, staging): (FileDiff, _) = open_bundle(scratch.path(), &pushed);
    assert_eq!(
        manifest.missing.keys().collect::<Vec<_>>(),
        vec!["etc/shared/b.conf"]
    );
    assert!(manifest.shared.is_empty());
    assert!(manifest.extra.is_empty());
    assert_eq!(
        manifest.extra_valid.keys().collect::<Vec<_>>(),
        vec!["queue/agent-groups/groups.mg"]
    );
    assert_eq!(
        std::fs::read(staging.join("etc/shared/b.conf")).unwrap(),
        b"beta"
    );
    std::fs::remove_dir_all(staging).unwrap();

    // Extra-valid was requested: the integrity slot is still held
    cluster.master.clear_integrity_executed();
    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"False"
    );

    // Follow-up round: ship the merged container back
    let container = merge(&[("queue/agent-groups/001", b"web-servers", "2021-06-07 12:00:00")]);
    let scratch2 = tempfile::tempdir().unwrap();
    let follow_up = build_bundle(
        scratch2.path(),
        &worker_tree
            .iter()
            .filter(|(k, _)| k.starts_with("queue/"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<HashMap<_, _>>(),
        &[("queue/agent-groups/groups.mg", container.as_slice())],
    );
    let task_id = worker.request_ok(codes::SYNC_EXTRA_VALID_BEGIN, b"").await;
    let task_id = String::from_utf8(task_id).unwrap();
    worker.upload("queue/cluster/w1/extra.bundle", &follow_up).await;
    worker
        .request_ok(
            codes::SYNC_EXTRA_VALID_END,
            format!("{task_id} queue/cluster/w1/extra.bundle").as_bytes(),
        )
        .await;

    // The member lands under the managed tree
    let dest = cluster.base().join("queue/agent-groups/001");
    wait_until("extra-valid member to be applied", || dest.exists()).await;
    assert_eq!(std::fs::read(&dest).unwrap(), b"web-servers");

    // The whole span is over: once the round closes, a fresh cycle grants
    // the probe again
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        cluster.master.clear_integrity_executed();
        let granted = worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await;
        if granted == b"True" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "integrity slot never freed after the extra-valid round"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// A worker-reported error releases the integrity slot immediately.
#[tokio::test]
async fn worker_reported_error_frees_the_slot() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let task_id = worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;
    let task_id = String::from_utf8(task_id).unwrap();

    worker
        .request_ok(
            codes::SYNC_INTEGRITY_ERROR,
            format!("{task_id} compression failed on the worker").as_bytes(),
        )
        .await;

    cluster.master.clear_integrity_executed();
    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"True"
    );
}

/// Second probe in the same snapshot cycle is refused even though the slot
/// is free.
#[tokio::test]
async fn duplicate_probe_within_a_cycle_is_refused() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"True"
    );
    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"False"
    );
}
