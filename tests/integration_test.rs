// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests for sven's core logic using the mock model provider.
use sven_config::{AgentMode, Config, ToolsConfig};
use sven_core::{Agent, EndReason};

fn mock_config() -> Config {
    let mut cfg = Config::default();
    cfg.model.provider = "mock".into();
    cfg.model.name = "mock-model".into();
    cfg
}

#[tokio::test]
async fn agent_returns_mock_response() {
    let cfg = mock_config();
    let agent = Agent::new(&cfg, "you are a test assistant", vec![]).expect("agent should build");
    let outcome = agent.send_user_text("hello").await.expect("turn should succeed");
    let text = outcome.final_response.as_message().as_text();
    assert!(text.as_deref().unwrap_or_default().contains("MOCK"));
    assert_eq!(outcome.ended_by, EndReason::EndTurn);
}

#[tokio::test]
async fn agent_tracks_cumulative_usage_across_turns() {
    let cfg = mock_config();
    let agent = Agent::new(&cfg, "you are a test assistant", vec![]).unwrap();
    agent.send_user_text("first").await.unwrap();
    agent.send_user_text("second").await.unwrap();
    let usage = agent.cumulative_usage();
    assert_eq!(usage.responses, 2);
}

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.model.provider, "openai");
    assert!(cfg.agent.max_tool_rounds > 0);
    assert!(cfg.agent.compaction_threshold > 0.0);
    assert!(cfg.mcp_servers.is_empty());
    assert_eq!(cfg.agent.budget.max_dollars, 0.0);
}

#[test]
fn tool_policy_auto_approve() {
    use sven_tools::{ApprovalPolicy, ToolPolicy};

    let cfg = ToolsConfig::default();
    let policy = ToolPolicy::from_config(&cfg);
    assert_eq!(policy.decide("cat /etc/hosts"), ApprovalPolicy::Auto);
    assert_eq!(policy.decide("ls /tmp"), ApprovalPolicy::Auto);
}

#[test]
fn tool_policy_deny() {
    use sven_tools::{ApprovalPolicy, ToolPolicy};

    let cfg = ToolsConfig { deny_patterns: vec!["rm -rf /*".into()], ..ToolsConfig::default() };
    let policy = ToolPolicy::from_config(&cfg);
    assert_eq!(policy.decide("rm -rf /*"), ApprovalPolicy::Deny);
}

#[tokio::test]
async fn shell_tool_executes_echo() {
    use sven_tools::Tool;
    use sven_tools::{ShellTool, ToolCall};

    let tool = ShellTool::default();
    let call = ToolCall { id: "1".into(), name: "shell".into(), args: serde_json::json!({ "shell_command": "echo hello_world" }) };
    let output = tool.execute(&call).await;
    assert!(!output.is_error);
    assert!(output.content.contains("hello_world"));
}

#[tokio::test]
async fn fs_tool_write_read_roundtrip() {
    use sven_tools::{ReadFileTool, Tool, ToolCall, WriteTool};

    let path = format!("/tmp/sven_test_{}.txt", uuid::Uuid::new_v4());

    let write_call = ToolCall { id: "w1".into(), name: "write".into(), args: serde_json::json!({ "path": path, "text": "roundtrip", "append": false }) };
    let wo = WriteTool.execute(&write_call).await;
    assert!(!wo.is_error, "write failed: {}", wo.content);

    let read_call = ToolCall { id: "r1".into(), name: "read_file".into(), args: serde_json::json!({ "path": path }) };
    let ro = ReadFileTool.execute(&read_call).await;
    assert!(!ro.is_error);
    assert!(ro.content.contains("roundtrip"));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn agent_respects_research_mode_tool_filtering() {
    let mut cfg = mock_config();
    cfg.agent.default_mode = AgentMode::Research;
    // Building the agent should not fail even when the tool table is
    // filtered down to a mode-appropriate subset.
    let agent = Agent::new(&cfg, "you are a test assistant", vec![]).unwrap();
    let outcome = agent.send_user_text("hello").await.unwrap();
    assert_eq!(outcome.ended_by, EndReason::EndTurn);
}
