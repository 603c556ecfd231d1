// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP client for sven — connects to external MCP tool servers over stdio,
//! http, or sse and surfaces their tools through the same [`sven_tools::Tool`]
//! interface as the built-ins, namespaced `"<server>_<tool>"`.

pub mod client;
pub mod tool;

pub use client::{McpConnectError, McpMultiplexer, DIAL_DEADLINE};
pub use tool::McpTool;
