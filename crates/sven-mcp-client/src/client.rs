// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Connects to the external MCP tool servers named in configuration and
//! surfaces their tools through the same [`sven_tools::Tool`] interface as
//! the built-ins.
//!
//! Dialing is fanned out across every configured server and bounded by a
//! single deadline — one slow or unreachable server does not hold up the
//! others, and a server that times out is reported as a connection failure
//! rather than blocking startup indefinitely.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::sse_client::SseClientTransport;
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use sven_config::{McpServerConfig, McpTransportKind};
use sven_tools::Tool;
use thiserror::Error;
use tokio::process::Command;

use crate::tool::McpTool;

/// How long the initial dial (connect + initialize + list_tools) for every
/// server gets before that server is given up on. Each server races
/// independently against this one deadline.
pub const DIAL_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum McpConnectError {
    #[error("mcp server '{name}' has no command (required for stdio transport)")]
    MissingCommand { name: String },
    #[error("mcp server '{name}' has no url (required for http/sse transport)")]
    MissingUrl { name: String },
    #[error("mcp server '{name}': {source}")]
    Dial { name: String, #[source] source: anyhow::Error },
    #[error("mcp server '{name}': dial timed out after {deadline:?}")]
    Timeout { name: String, deadline: Duration },
}

struct Connection {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    service: Arc<RunningService<RoleClient, ()>>,
}

/// A live set of MCP server connections and the namespaced tools they expose.
pub struct McpMultiplexer {
    connections: Vec<Connection>,
}

impl McpMultiplexer {
    /// Dial every server in `configs` concurrently, bounded by [`DIAL_DEADLINE`].
    ///
    /// Returns the multiplexer over whichever servers answered in time, plus
    /// one [`McpConnectError`] per server that did not. A multiplexer with
    /// zero connections and a non-empty error list is a valid, non-fatal
    /// outcome — the agent runs with only its local tools.
    pub async fn connect_all(configs: &[McpServerConfig]) -> (Self, Vec<McpConnectError>) {
        let dials = configs.iter().map(|cfg| dial_one(cfg.clone()));
        let results = futures::future::join_all(dials).await;

        let mut connections = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(conn) => connections.push(conn),
                Err(e) => errors.push(e),
            }
        }
        (Self { connections }, errors)
    }

    /// Every remote tool across every connected server, already namespaced
    /// `"<server>_<tool>"` and ready to hand to a [`sven_tools::ToolRegistry`].
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.connections.iter().flat_map(|c| c.tools.clone()).collect()
    }

    pub fn connected_servers(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name.as_str()).collect()
    }

    /// Close every connection. Errors closing an individual connection are
    /// logged, not propagated — shutdown must not fail partway through.
    pub async fn shutdown(self) {
        for conn in self.connections {
            if let Ok(service) = Arc::try_unwrap(conn.service) {
                if let Err(e) = service.cancel().await {
                    tracing::warn!(server = %conn.name, error = %e, "error closing mcp connection");
                }
            }
        }
    }
}

async fn dial_one(cfg: McpServerConfig) -> Result<Connection, McpConnectError> {
    let name = cfg.name.clone();
    match tokio::time::timeout(DIAL_DEADLINE, dial_one_inner(&cfg)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(McpConnectError::Timeout { name, deadline: DIAL_DEADLINE }),
    }
}

async fn dial_one_inner(cfg: &McpServerConfig) -> Result<Connection, McpConnectError> {
    let name = cfg.name.clone();

    let service = match cfg.transport {
        McpTransportKind::Stdio => {
            let command = cfg
                .command
                .clone()
                .ok_or_else(|| McpConnectError::MissingCommand { name: name.clone() })?;
            let mut proc = Command::new(&command);
            proc.args(&cfg.args).envs(&cfg.env).stderr(Stdio::inherit());
            let transport = TokioChildProcess::new(proc)
                .map_err(|e| McpConnectError::Dial { name: name.clone(), source: e.into() })?;
            client_info()
                .serve(transport)
                .await
                .map_err(|e| McpConnectError::Dial { name: name.clone(), source: e.into() })?
        }
        McpTransportKind::Sse | McpTransportKind::Http => {
            let url = cfg
                .url
                .clone()
                .ok_or_else(|| McpConnectError::MissingUrl { name: name.clone() })?;
            let transport = SseClientTransport::start(url)
                .await
                .map_err(|e| McpConnectError::Dial { name: name.clone(), source: e.into() })?;
            client_info()
                .serve(transport)
                .await
                .map_err(|e| McpConnectError::Dial { name: name.clone(), source: e.into() })?
        }
    };

    let service = Arc::new(service);

    let listing = service
        .list_tools(Default::default())
        .await
        .map_err(|e| McpConnectError::Dial { name: name.clone(), source: e.into() })?;

    let tools: Vec<Arc<dyn Tool>> = listing
        .tools
        .into_iter()
        .map(|t| {
            let input_schema = serde_json::to_value(&*t.input_schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
            Arc::new(McpTool::new(
                name.clone(),
                t.name.to_string(),
                t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema,
                service.clone(),
            )) as Arc<dyn Tool>
        })
        .collect();

    tracing::info!(server = %name, tool_count = tools.len(), "connected to mcp server");

    Ok(Connection { name, tools, service })
}

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation { name: "sven".into(), version: env!("CARGO_PKG_VERSION").into() },
    }
}
