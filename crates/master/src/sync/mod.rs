// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronization building blocks: slot gates, receive tasks, the DAPI
//! correlator table, the integrity differ, snapshot scanning, archives and
//! the file-apply policy.

pub mod apply;
pub mod archive;
pub mod diff;
pub mod pending;
pub mod receive;
pub mod slots;
pub mod snapshot;

pub use diff::{compare_files, DiffCounts, FileDiff};
pub use pending::PendingRequests;
pub use receive::{Artifact, ReceiveTask, ReceiveTasks};
pub use slots::SyncSlots;
pub use snapshot::{scan_file_tree, FileMetadata, FileTree};
