// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAPI correlator specs: round-trips, forwards, timeouts and late
//! responses.

use crate::prelude::*;
use warden_wire::codes;

/// A `dapi` request goes out on the worker link tagged with a request id;
/// the matching `dapi_res` wakes the caller.
#[tokio::test]
async fn dapi_roundtrip_wakes_the_caller() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;
    let session = cluster.master.client("w1").unwrap();

    let call = tokio::spawn(async move { session.execute(codes::DAPI, b"GET /status", false).await });

    // The worker sees the request prefixed by its correlation id
    let (id, command, payload) = worker.expect_request().await;
    assert_eq!(command, codes::DAPI);
    let text = String::from_utf8(payload).unwrap();
    let (request_id, body) = text.split_once(' ').unwrap();
    assert_eq!(body, "GET /status");
    worker.respond(id, true, b"queued").await;

    // Ship the response back through the string registry
    let string_id = worker.request_ok(codes::NEW_STR, b"{\"status\":\"green\"}").await;
    let string_id = String::from_utf8(string_id).unwrap();
    worker
        .request_ok(codes::DAPI_RES, format!("{request_id} {string_id}").as_bytes())
        .await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response, "{\"status\":\"green\"}");
    assert!(cluster.master.pending_requests().is_empty());
}

/// Forwarding to a worker that is not connected fails fast and leaves no
/// pending entry behind.
#[tokio::test]
async fn forward_to_a_disconnected_worker_fails() {
    let (cluster, addr) = Cluster::start().await;
    let _worker = TestWorker::join(&cluster, addr, "w1").await;
    let session = cluster.master.client("w1").unwrap();

    let err = session
        .execute(codes::DAPI_FWD, b"w9 GET /status", false)
        .await
        .unwrap_err();
    assert_eq!(err, warden_core::ClusterError::WorkerNotFound("w9".into()));
    assert!(cluster.master.pending_requests().is_empty());
}

/// Forwarding relays the payload to the target worker's own link.
#[tokio::test]
async fn forward_reaches_the_target_worker() {
    let (cluster, addr) = Cluster::start().await;
    let mut origin = TestWorker::join(&cluster, addr, "w1").await;
    let mut target = TestWorker::join(&cluster, addr, "w2").await;
    let session = cluster.master.client("w1").unwrap();

    let call =
        tokio::spawn(async move { session.execute(codes::DAPI_FWD, b"w2 GET /agents", false).await });

    let (id, command, payload) = target.expect_request().await;
    assert_eq!(command, codes::DAPI);
    let text = String::from_utf8(payload).unwrap();
    let (request_id, body) = text.split_once(' ').unwrap();
    assert_eq!(body, "GET /agents");
    target.respond(id, true, b"queued").await;

    let string_id = target.request_ok(codes::NEW_STR, b"agents!").await;
    let string_id = String::from_utf8(string_id).unwrap();
    target
        .request_ok(codes::DAPI_RES, format!("{request_id} {string_id}").as_bytes())
        .await;

    assert_eq!(call.await.unwrap().unwrap(), "agents!");

    // The origin worker never saw any of it
    let (ok, _) = origin.request(codes::KEEPALIVE, b"ping").await;
    assert!(ok);
}

/// Without a response the bounded wait fails with a timeout, and the late
/// response is then consumed and discarded.
#[tokio::test]
async fn timeout_leaves_the_entry_for_the_late_response() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;
    let session = cluster.master.client("w1").unwrap();

    let call = tokio::spawn(async move { session.execute(codes::DAPI, b"GET /slow", false).await });

    let (id, command, payload) = worker.expect_request().await;
    assert_eq!(command, codes::DAPI);
    let text = String::from_utf8(payload).unwrap();
    let (request_id, _) = text.split_once(' ').unwrap();
    let request_id = request_id.to_string();
    worker.respond(id, true, b"queued").await;

    // No dapi_res: the caller times out (timeout_dapi_request is 1s here)
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, warden_core::ClusterError::DapiTimeout);
    assert!(cluster.master.pending_requests().contains(&request_id));

    // The late response is swallowed by the abandoned entry
    let string_id = worker.request_ok(codes::NEW_STR, b"too late").await;
    let string_id = String::from_utf8(string_id).unwrap();
    worker
        .request_ok(codes::DAPI_RES, format!("{request_id} {string_id}").as_bytes())
        .await;
    assert!(cluster.master.pending_requests().is_empty());
}

/// A non-DAPI command passed to execute dispatches through the regular
/// command table.
#[tokio::test]
async fn execute_dispatches_other_commands_locally() {
    let (cluster, addr) = Cluster::start().await;
    let _worker = TestWorker::join(&cluster, addr, "w1").await;
    let session = cluster.master.client("w1").unwrap();

    let response = session
        .execute(codes::SYNC_AGENT_INFO_PERMISSION, b"", false)
        .await
        .unwrap();
    assert_eq!(response, "True");
    assert!(cluster.master.pending_requests().is_empty());
}
