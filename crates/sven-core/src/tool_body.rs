// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The runnable side of a C2 tool entry, and the per-call context a tool
//! body runs with.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sven_model::content::ToolDescriptor;
use sven_tools::{Tool, ToolCall};

use crate::conversation::Conversation;

/// Carried into every tool body: the ID of the `tool_use` part it is
/// answering, a token that goes cancelled when `cancel_tool_use` fires or
/// the conversation shuts down, and a handle on the conversation the call
/// belongs to (so tools that need an auxiliary model call can open a
/// sub-conversation — see §4.6).
pub struct ToolCallContext {
    pub tool_use_id: String,
    pub cancel: CancellationToken,
    pub conversation: Arc<Conversation>,
}

/// What a tool body produced.
pub enum ToolBodyOutcome {
    /// Plain-text success body.
    Text(String),
    /// Non-fatal failure; wrapped as a `tool_result` with `is_error=true`.
    Error(String),
    /// Sentinel (boundary 10): the body hands control to the user instead of
    /// returning a result. The worker drops its slot — no `tool_result` part
    /// is emitted for this call, and the turn is still well-formed.
    DoNotRespond,
}

/// A runnable C2 entry. `descriptor()` feeds the request's `tools` list;
/// `call()` is invoked by [`Conversation::tool_result_contents`] once per
/// dispatched `tool_use` part.
#[async_trait]
pub trait ToolBody: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    async fn call(&self, input: Value, ctx: ToolCallContext) -> ToolBodyOutcome;
}

/// Adapts the harness's existing [`sven_tools::Tool`] trait — used by every
/// built-in and MCP-proxied tool — into a [`ToolBody`].
///
/// Legacy tools have no cancellation hook of their own; a cancelled legacy
/// call still runs to completion, it just races the cancellation token in
/// [`Conversation::tool_result_contents`] and loses the result if the token
/// fires first.
pub struct LegacyToolAdapter(pub Arc<dyn Tool>);

impl LegacyToolAdapter {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self(tool)
    }
}

#[async_trait]
impl ToolBody for LegacyToolAdapter {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.0.name().to_string(),
            description: self.0.description().to_string(),
            input_schema: self.0.parameters_schema(),
            type_tag: None,
            ends_turn: false,
        }
    }

    async fn call(&self, input: Value, ctx: ToolCallContext) -> ToolBodyOutcome {
        let call = ToolCall { id: ctx.tool_use_id, name: self.0.name().to_string(), args: input };
        let output = self.0.execute(&call).await;
        if output.is_error {
            ToolBodyOutcome::Error(output.content)
        } else {
            ToolBodyOutcome::Text(output.content)
        }
    }
}
