// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command codes exchanged on the worker link.
//!
//! The codes are literal strings on the wire; both peers must agree on them
//! byte for byte.

/// Worker→master: probe the integrity slot.
pub const SYNC_INTEGRITY_PERMISSION: &str = "syn_i_w_m_p";
/// Worker→master: probe the agent-info slot.
pub const SYNC_AGENT_INFO_PERMISSION: &str = "syn_a_w_m_p";

/// Worker→master: begin sending integrity metadata.
pub const SYNC_INTEGRITY_BEGIN: &str = "syn_i_w_m";
/// Worker→master: begin sending extra-valid files.
pub const SYNC_EXTRA_VALID_BEGIN: &str = "syn_e_w_m";
/// Worker→master: begin sending agent-info chunks.
pub const SYNC_AGENT_INFO_BEGIN: &str = "syn_a_w_m";

/// Worker→master: integrity artifact fully sent (`task-id filename`).
pub const SYNC_INTEGRITY_END: &str = "syn_i_w_m_e";
/// Worker→master: extra-valid artifact fully sent (`task-id filename`).
pub const SYNC_EXTRA_VALID_END: &str = "syn_e_w_m_e";
/// Worker→master: worker-side error during an integrity round.
pub const SYNC_INTEGRITY_ERROR: &str = "syn_i_w_m_r";

/// Master→worker: integrity compared equal, no sync required.
pub const SYNC_OK: &str = "syn_m_c_ok";
/// Master→worker: start of the master files push.
pub const SYNC_PUSH_BEGIN: &str = "syn_m_c";
/// Master→worker: end of the master files push (`task-id relpath`).
pub const SYNC_PUSH_END: &str = "syn_m_c_e";
/// Master→worker: the master files push failed (`task-id error`).
pub const SYNC_PUSH_ERROR: &str = "syn_m_c_r";

/// Master→worker: agent-info result document.
pub const SYNC_AGENT_INFO_RESULT: &str = "syn_m_a_e";
/// Master→worker: agent-info error diagnostic.
pub const SYNC_AGENT_INFO_ERR: &str = "syn_m_a_err";

/// Distributed API request.
pub const DAPI: &str = "dapi";
/// Distributed API response (`request-id string-id`).
pub const DAPI_RES: &str = "dapi_res";
/// Distributed API error (`client-name error`).
pub const DAPI_ERR: &str = "dapi_err";
/// Distributed API forward (`client-name payload`).
pub const DAPI_FWD: &str = "dapi_fwd";

/// Cluster control: connected node info.
pub const GET_NODES: &str = "get_nodes";
/// Cluster control: health projection.
pub const GET_HEALTH: &str = "get_health";
/// Enqueue on the SendSync queue.
pub const SEND_SYNC: &str = "sendsync";

/// Base layer: worker registration (`name cluster type version`).
pub const HELLO: &str = "hello";
/// Base layer: keepalive echo.
pub const KEEPALIVE: &str = "keepalive";
/// Base layer: open an inbound file (`relative-path`).
pub const NEW_FILE: &str = "new_file";
/// Base layer: append an inbound file chunk (`relative-path\0chunk`).
pub const FILE_UPD: &str = "file_upd";
/// Base layer: close an inbound file (`relative-path md5`).
pub const FILE_END: &str = "file_end";
/// Base layer: store a string artifact, returns its id.
pub const NEW_STR: &str = "new_str";
/// Base layer: abort a task (`task-id error`).
pub const CANCEL_TASK: &str = "cancel_task";
