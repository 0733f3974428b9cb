// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-info sync specs: chunk forwarding, error accounting and the
//! payload-decode failure paths.

use crate::prelude::*;
use warden_wire::codes;

async fn begin_agent_info(worker: &mut TestWorker, payload: &[u8]) -> String {
    let string_id = worker.request_ok(codes::NEW_STR, payload).await;
    let string_id = String::from_utf8(string_id).unwrap();
    let task_id = worker
        .request_ok(codes::SYNC_AGENT_INFO_BEGIN, string_id.as_bytes())
        .await;
    assert_eq!(task_id, string_id.as_bytes());
    string_id
}

/// One bad chunk is counted, the loop continues, and the worker receives
/// the aggregate result.
#[tokio::test]
async fn one_bad_chunk_is_counted_without_aborting() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    cluster.db.push_response(Ok(("ok".to_string(), String::new())));
    cluster
        .db
        .push_response(Ok(("err".to_string(), "reason".to_string())));
    cluster.db.push_response(Ok(("ok".to_string(), String::new())));

    let payload = serde_json::json!({
        "set_data_command": "agent 001 sync-agent-info set",
        "chunks": ["good1", "bad", "good3"],
    });
    begin_agent_info(&mut worker, payload.to_string().as_bytes()).await;

    let (id, command, result) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_AGENT_INFO_RESULT);
    let result: serde_json::Value = serde_json::from_slice(&result).unwrap();
    assert_eq!(
        result,
        serde_json::json!({
            "updated_chunks": 2,
            "error_messages": [["err", "reason"]],
        })
    );
    worker.respond(id, true, b"thanks").await;

    wait_until("all chunks to reach the agent db", || {
        cluster.db.queries().len() == 3
    })
    .await;
    assert_eq!(
        cluster.db.queries(),
        vec![
            "agent 001 sync-agent-info set good1",
            "agent 001 sync-agent-info set bad",
            "agent 001 sync-agent-info set good3",
        ]
    );
}

/// Empty chunk list: zero updates, no errors, acknowledgment still sent.
#[tokio::test]
async fn empty_chunk_list_yields_an_empty_result() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    let payload = serde_json::json!({
        "set_data_command": "agent 001 sync-agent-info set",
        "chunks": [],
    });
    begin_agent_info(&mut worker, payload.to_string().as_bytes()).await;

    let (id, command, result) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_AGENT_INFO_RESULT);
    let result: serde_json::Value = serde_json::from_slice(&result).unwrap();
    assert_eq!(
        result,
        serde_json::json!({"updated_chunks": 0, "error_messages": []})
    );
    worker.respond(id, true, b"thanks").await;
    assert!(cluster.db.queries().is_empty());
}

/// A task id with no received string produces the access diagnostic.
#[tokio::test]
async fn missing_string_artifact_sends_the_access_diagnostic() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    worker
        .request_ok(codes::SYNC_AGENT_INFO_BEGIN, b"ghost-string-id")
        .await;

    let (id, command, diagnostic) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_AGENT_INFO_ERR);
    let text = String::from_utf8(diagnostic).unwrap();
    assert!(text.contains("ghost-string-id"), "diagnostic: {text}");
    worker.respond(id, true, b"ok").await;

    // The slot frees through the failure path
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let granted = worker
            .request_ok(codes::SYNC_AGENT_INFO_PERMISSION, b"")
            .await;
        if granted == b"True" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent-info slot never freed after the failure"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// Malformed JSON produces the parse diagnostic.
#[tokio::test]
async fn malformed_json_sends_the_parse_diagnostic() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    begin_agent_info(&mut worker, b"this is not json").await;

    let (id, command, diagnostic) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_AGENT_INFO_ERR);
    let text = String::from_utf8(diagnostic).unwrap();
    assert!(text.contains("JSON"), "diagnostic: {text}");
    worker.respond(id, true, b"ok").await;
}

/// Agent-info runs while an integrity round is open: the two pipelines use
/// independent slots.
#[tokio::test]
async fn agent_info_overlaps_an_open_integrity_round() {
    let (cluster, addr) = Cluster::start().await;
    let mut worker = TestWorker::join(&cluster, addr, "w1").await;

    worker.request_ok(codes::SYNC_INTEGRITY_BEGIN, b"").await;

    let payload = serde_json::json!({
        "set_data_command": "agent 001 sync-agent-info set",
        "chunks": ["c1"],
    });
    begin_agent_info(&mut worker, payload.to_string().as_bytes()).await;

    let (id, command, result) = worker.expect_request().await;
    assert_eq!(command, codes::SYNC_AGENT_INFO_RESULT);
    let result: serde_json::Value = serde_json::from_slice(&result).unwrap();
    assert_eq!(result["updated_chunks"], 1);
    worker.respond(id, true, b"thanks").await;
}
