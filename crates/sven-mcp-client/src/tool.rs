// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! [`McpTool`] — a local [`Tool`] that proxies a remote MCP tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use serde_json::Value;
use sven_config::AgentMode;
use sven_tools::{ApprovalPolicy, OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

/// Remote tool calls get 30 seconds to complete; past that we report a
/// timeout and let the caller decide whether to retry.
const CALL_TOOL_DEADLINE: Duration = Duration::from_secs(30);

/// A tool whose body is a `CallTool` RPC against a connected MCP server.
///
/// `name()` returns the namespaced form `"<server>_<tool>"` so that two
/// servers exposing the same tool name never collide in the registry.
pub struct McpTool {
    server: String,
    remote_name: String,
    namespaced_name: String,
    description: String,
    input_schema: Value,
    service: Arc<RunningService<RoleClient, ()>>,
}

impl McpTool {
    pub fn new(
        server: impl Into<String>,
        remote_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        service: Arc<RunningService<RoleClient, ()>>,
    ) -> Self {
        let server = server.into();
        let remote_name = remote_name.into();
        let namespaced_name = format!("{server}_{remote_name}");
        Self {
            server,
            remote_name,
            namespaced_name,
            description: description.into(),
            input_schema,
            service,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        // Remote tools run code we don't control; ask unless the user has
        // explicitly approved this server's patterns.
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Research, AgentMode::Plan, AgentMode::Agent]
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let arguments = call.args.as_object().cloned();
        let params = CallToolRequestParams {
            name: self.remote_name.clone().into(),
            arguments,
        };

        let result = tokio::time::timeout(CALL_TOOL_DEADLINE, self.service.call_tool(params)).await;

        match result {
            Err(_) => ToolOutput::err(
                &call.id,
                format!("mcp call_tool timed out after {}s", CALL_TOOL_DEADLINE.as_secs()),
            ),
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("mcp call_tool failed: {e}")),
            Ok(Ok(res)) => {
                let parts: Vec<ToolOutputPart> = res
                    .content
                    .into_iter()
                    .filter_map(|c| c.as_text().map(|t| ToolOutputPart::Text(t.text.clone())))
                    .collect();
                let is_error = res.is_error.unwrap_or(false);
                if is_error {
                    let text = parts
                        .into_iter()
                        .filter_map(|p| match p {
                            ToolOutputPart::Text(t) => Some(t),
                            ToolOutputPart::Image(_) => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    ToolOutput::err(&call.id, text)
                } else if parts.is_empty() {
                    ToolOutput::ok(&call.id, "")
                } else {
                    ToolOutput::with_parts(&call.id, parts)
                }
            }
        }
    }
}
