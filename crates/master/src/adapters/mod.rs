// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters for external collaborators: the agent database service and the
//! local API server's client connections.

mod agentdb;
mod localapi;

pub use agentdb::{AgentDb, FakeAgentDb, UnixAgentDb};
pub use localapi::{LocalClients, LocalDelivery};
