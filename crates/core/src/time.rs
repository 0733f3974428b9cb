// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronization timestamps.
//!
//! All sync status records use [`SyncTime`]: a UTC timestamp whose epoch-zero
//! value is the "never happened" sentinel. The sentinel serializes as `"n/a"`
//! and everything else uses the canonical microsecond format, so health
//! documents round-trip losslessly.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical textual timestamp format (microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%6f";

const NEVER_TEXT: &str = "n/a";

/// A sync status timestamp. Epoch zero means "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncTime(DateTime<Utc>);

impl SyncTime {
    /// The "never happened" sentinel.
    pub fn never() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn is_never(&self) -> bool {
        self.0 == DateTime::<Utc>::UNIX_EPOCH
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`, clamped at zero.
    pub fn secs_since(&self, earlier: SyncTime) -> f64 {
        let millis = (self.0 - earlier.0).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }
}

impl Default for SyncTime {
    fn default() -> Self {
        Self::never()
    }
}

impl From<DateTime<Utc>> for SyncTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl std::fmt::Display for SyncTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_never() {
            write!(f, "{NEVER_TEXT}")
        } else {
            write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
        }
    }
}

impl Serialize for SyncTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SyncTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == NEVER_TEXT {
            return Ok(Self::never());
        }
        let naive = parse_mtime(&raw).map_err(D::Error::custom)?;
        Ok(Self(naive.and_utc()))
    }
}

/// Parse a modification-time string in either second or microsecond
/// precision (`YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DD HH:MM:SS.ffffff`).
pub fn parse_mtime(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
#[path = "time_tests.rs"]
mod tests;
