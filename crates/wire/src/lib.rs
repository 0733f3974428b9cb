// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Link protocol for master/worker communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + frame body. Frames carry
//! either a correlated request (command + payload) or its response.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod codes;
mod frame;

pub use frame::{read_frame, write_frame, Frame, ProtocolError, MAX_FRAME_LEN};
