// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Assembles the built-in C2 tool table and, optionally, merges in whatever
//! [`sven_mcp_client`] surfaced from configured MCP servers.

use std::sync::Arc;

use sven_config::Config;

use crate::tool_body::LegacyToolAdapter;
use crate::tool_registry::ToolTable;

/// Build the default tool table from every built-in tool, filtered to those
/// available in `mode`.
pub fn default_tool_table(mode: sven_config::AgentMode) -> Arc<ToolTable> {
    let builtins: Vec<Arc<dyn sven_tools::Tool>> = vec![
        Arc::new(sven_tools::ReadFileTool),
        Arc::new(sven_tools::WriteTool),
        Arc::new(sven_tools::EditFileTool),
        Arc::new(sven_tools::ApplyPatchTool),
        Arc::new(sven_tools::DeleteFileTool),
        Arc::new(sven_tools::FindFileTool),
        Arc::new(sven_tools::GrepTool),
        Arc::new(sven_tools::ListDirTool),
        Arc::new(sven_tools::ReadLintsTool),
        Arc::new(sven_tools::SearchCodebaseTool),
        Arc::new(sven_tools::RunTerminalCommandTool::default()),
        Arc::new(sven_tools::ShellTool::default()),
        Arc::new(sven_tools::WebFetchTool),
        Arc::new(sven_tools::WebSearchTool::default()),
        Arc::new(sven_tools::AskQuestionTool::new_headless()),
        Arc::new(sven_tools::UpdateMemoryTool::default()),
    ];

    let mut builder = ToolTable::builder();
    for tool in builtins.into_iter().filter(|t| t.modes().contains(&mode)) {
        builder = builder
            .add(Arc::new(LegacyToolAdapter::new(tool)))
            .expect("built-in tool names are unique by construction");
    }
    Arc::new(builder.build())
}

/// Merge MCP-sourced tools (already namespaced `"<server>_<tool>"` by
/// [`sven_mcp_client::McpTool`]) into a freshly-built builtin table.
pub fn tool_table_with_mcp(mode: sven_config::AgentMode, mcp_tools: Vec<Arc<dyn sven_tools::Tool>>) -> anyhow::Result<Arc<ToolTable>> {
    let base = default_tool_table(mode);
    let mut builder = ToolTable::builder();
    for desc_name in base.descriptors() {
        builder = builder.add(base.get(&desc_name.name).unwrap().clone())?;
    }
    for tool in mcp_tools {
        builder = builder.add(Arc::new(LegacyToolAdapter::new(tool)))?;
    }
    Ok(Arc::new(builder.build()))
}

/// Unused but kept as a grounding anchor for callers that want to read
/// `agent.tools` config before deciding which built-ins to include — not
/// currently branched on, since every built-in is safe to expose by default.
#[allow(dead_code)]
fn _uses_config_shape(_cfg: &Config) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tool_table_is_nonempty_for_agent_mode() {
        let table = default_tool_table(sven_config::AgentMode::Agent);
        assert!(!table.is_empty());
        assert!(table.get("read_file").is_some());
    }
}
