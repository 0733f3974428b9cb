// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the master daemon.

use std::path::PathBuf;

/// Config file path (`WARDEN_CONFIG`). Absent means built-in defaults.
pub fn config_path() -> Option<PathBuf> {
    std::env::var("WARDEN_CONFIG").ok().map(PathBuf::from)
}

/// Bind address for worker connections (`WARDEN_BIND`).
pub fn bind_addr() -> String {
    std::env::var("WARDEN_BIND").unwrap_or_else(|_| "0.0.0.0:1516".to_string())
}

/// Optional log directory (`WARDEN_LOG_DIR`). When set, logs also go to a
/// daily-rotated file there.
pub fn log_dir() -> Option<PathBuf> {
    std::env::var("WARDEN_LOG_DIR").ok().map(PathBuf::from)
}
