// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agentic conversation core: C5 Conversation Engine, C6 sub-conversation
//! tree, C7 budget controller, C8 agent loop, and the observability/
//! experiments hooks (C9/C10) that wrap them.

pub mod agent_loop;
pub mod conversation;
pub mod experiments;
pub mod listener;
pub mod tool_body;
pub mod tool_registry;
pub mod toolset;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sven_config::Config;
use sven_model::content::SystemBlock;

pub use agent_loop::{run_turn, EndReason, TurnOutcome};
pub use conversation::{Budget, Conversation, ConversationError, UsageSnapshot};
pub use listener::{Listener, NoopListener, TracingListener};
pub use tool_body::{LegacyToolAdapter, ToolBody, ToolBodyOutcome, ToolCallContext};
pub use tool_registry::ToolTable;

/// Top-level facade: owns the root [`Conversation`] and the conversation-wide
/// shutdown token, and exposes one entry point per user turn.
pub struct Agent {
    pub conversation: Arc<Conversation>,
    shutdown: CancellationToken,
}

impl Agent {
    /// Build an `Agent` from configuration: resolves the model provider,
    /// assembles the built-in tool table (merging in `mcp_tools` if any were
    /// dialed via `sven-mcp-client`), and applies the configured budget and
    /// system prompt.
    pub fn new(cfg: &Config, system_prompt: impl Into<String>, mcp_tools: Vec<Arc<dyn sven_tools::Tool>>) -> anyhow::Result<Self> {
        let provider: Arc<dyn sven_model::ContentProvider> =
            sven_model::content_provider_from_config(&cfg.model)?.into();
        let tools = toolset::tool_table_with_mcp(cfg.agent.default_mode, mcp_tools)?;
        let budget = Budget { max_dollars: cfg.agent.budget.max_dollars };
        let max_tokens = cfg.model.max_tokens.unwrap_or(4096);

        if !cfg.agent.experiments.is_empty() {
            experiments::enable_from(&cfg.agent.experiments);
        }
        if let Ok(env_flags) = std::env::var("SVEN_EXPERIMENTS") {
            experiments::enable_from(&env_flags);
        }

        let conversation = Conversation::new(
            uuid::Uuid::new_v4().to_string(),
            provider,
            tools,
            vec![SystemBlock::cacheable(system_prompt)],
            cfg.model.name.clone(),
            max_tokens,
            budget,
            Arc::new(TracingListener),
        );

        Ok(Self { conversation, shutdown: CancellationToken::new() })
    }

    /// Run one user turn to completion (see [`agent_loop::run_turn`]).
    pub async fn send_user_text(&self, text: impl Into<String>) -> Result<TurnOutcome, ConversationError> {
        let span = experiments::convo_span(&self.conversation.id, self.conversation.parent.as_ref().map(|p| p.id.as_str()));
        run_turn(&self.conversation, text, &self.shutdown).instrument(span).await
    }

    pub fn cumulative_usage(&self) -> UsageSnapshot {
        self.conversation.cumulative_usage()
    }

    /// Trip the conversation-wide shutdown token: any in-flight DISPATCH
    /// answers its outstanding tool calls with cancellation results instead
    /// of waiting for them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
