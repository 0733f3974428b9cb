// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle specs: hello validation, keepalives, health
//! queries and teardown.

use crate::prelude::*;
use warden_wire::{codes, read_frame, ProtocolError};

#[tokio::test]
async fn hello_with_a_version_mismatch_closes_the_connection() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::connect(addr).await;

    let (ok, response) = worker.request(codes::HELLO, b"w1 warden worker 0.0.1").await;
    assert!(!ok);
    let text = String::from_utf8(response).unwrap();
    assert!(text.contains("WrongVersion"), "error payload: {text}");

    // The master hangs up after a rejected hello
    let err = read_frame(worker.reader_mut()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));

    wait_until("rejected worker to be dropped from the registry", || {
        cluster.master.client("w1").is_none()
    })
    .await;
    // No staging directory was created for the rejected worker
    assert!(!cluster.base().join("queue/cluster/w1").exists());
}

#[tokio::test]
async fn hello_with_a_foreign_cluster_name_is_rejected() {
    let (_cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::connect(addr).await;

    let (ok, response) = worker
        .request(codes::HELLO, b"w1 another-cluster worker 0.2.0")
        .await;
    assert!(!ok);
    let text = String::from_utf8(response).unwrap();
    assert!(text.contains("WrongClusterName"), "error payload: {text}");
}

#[tokio::test]
async fn disconnect_mid_sync_cancels_the_round_and_unregisters() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;
    assert!(cluster.master.client("w1").is_some());

    drop(worker);

    wait_until("worker to be unregistered", || {
        cluster.master.client("w1").is_none()
    })
    .await;
}

#[tokio::test]
async fn a_reconnecting_worker_gets_fresh_slots() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;
    worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;
    drop(worker);
    wait_until("worker to be unregistered", || {
        cluster.master.client("w1").is_none()
    })
    .await;

    let mut worker = TestWorker::join(&cluster, addr, "w1").await;
    cluster.master.clear_integrity_executed();
    assert_eq!(
        worker.request_ok(codes::SYNC_INTEGRITY_PERMISSION, b"").await,
        b"True"
    );
}

#[tokio::test]
async fn get_nodes_lists_the_master_and_connected_workers() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let response = worker.request_ok(codes::GET_NODES, b"{}").await;
    let nodes: serde_json::Value = serde_json::from_slice(&response).unwrap();
    let names: Vec<&str> = nodes.as_object().unwrap().keys().map(|s| s.as_str()).collect();
    assert_eq!(names, vec!["master", "w1"]);
    assert_eq!(nodes["w1"]["type"], "worker");
    assert_eq!(nodes["master"]["type"], "master");
}

#[tokio::test]
async fn get_health_reports_na_for_never_synced_workers() {
    let (cluster, addr) = Cluster::start().await;
    cluster.db.set_active("w1", 5);
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let response = worker.request_ok(codes::GET_HEALTH, b"{}").await;
    let health: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(health["n_connected_nodes"], 1);
    let status = &health["nodes"]["w1"]["status"];
    assert_eq!(status["last_check_integrity"]["date_start_master"], "n/a");
    assert_eq!(status["last_sync_agentinfo"]["n_synced_chunks"], 0);
    // The keepalive is a real timestamp, not the sentinel
    assert_ne!(status["last_keep_alive"], "n/a");
    assert_eq!(health["nodes"]["w1"]["info"]["n_active_agents"], 5);
    // The master entry carries info only
    assert!(health["nodes"]["master"]["status"].is_null());
}

#[tokio::test]
async fn keepalive_echoes_and_is_visible_in_health() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let echoed = worker.request_ok(codes::KEEPALIVE, b"beat-1").await;
    assert_eq!(echoed, b"beat-1");

    let health = cluster.master.get_health(None).await.unwrap();
    let status = health.nodes["w1"].status.as_ref().unwrap();
    assert!(!status.last_keep_alive.is_never());
}
