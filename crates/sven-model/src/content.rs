// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider-neutral message and request/response shapes.
//!
//! This is the wire-agnostic data model the conversation engine builds and
//! reads.  Every provider adapter translates `Request` into its own HTTP body
//! and translates the HTTP response back into a single `Response`.  Keeping
//! one neutral shape here means new providers only need a translation layer,
//! never a change to the engine that drives the conversation.

use serde::{Deserialize, Serialize};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// The body of a tool result: either a single text blob or mixed text/image parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultBody {
    Text(String),
    Parts(Vec<ResultPart>),
}

impl ToolResultBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Parts(_) => None,
        }
    }

    /// Lossy flattening to text used by wire paths that only support a
    /// single string tool message body (the OpenAI-compatible path).
    pub fn flatten_to_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ResultPart::Text { text } => Some(text.as_str()),
                    ResultPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolResultBody {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolResultBody {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One part of a nested tool-result body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultPart {
    Text { text: String },
    Image { image_url: String },
}

/// A single content part inside a [`Message`].
///
/// Tagged rather than inheriting, per the rest of the workspace's content
/// model: a discriminator decides which fields are meaningful, there is no
/// shared base with ambiguous field semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    /// Opaque reasoning blob. Forwarded to the provider verbatim, never
    /// surfaced to tools.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(skip, default)]
        started_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultBody,
        #[serde(default)]
        is_error: bool,
        #[serde(skip, default)]
        finished_at: Option<chrono::DateTime<chrono::Utc>>,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse { id: id.into(), name: name.into(), input, started_at: None }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<ToolResultBody>, is_error: bool) -> Self {
        Self::ToolResult { tool_use_id: tool_use_id.into(), content: content.into(), is_error, finished_at: None }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Self::ToolUse { id, .. } => Some(id),
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

/// A single message in the conversation's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: vec![Content::text(text)] }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: vec![Content::text(text)] }
    }

    pub fn user(content: Vec<Content>) -> Self {
        Self { role: Role::User, content }
    }

    pub fn assistant(content: Vec<Content>) -> Self {
        Self { role: Role::Assistant, content }
    }

    /// A message with no content parts at all — filtered out before
    /// transmission, per the conversation engine's assembly invariant.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// `tool_use` parts in this message, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|c| match c {
            Content::ToolUse { id, name, input, .. } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    /// `tool_result` parts in this message, in order.
    pub fn tool_results(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            Content::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }

    pub fn as_text(&self) -> Option<String> {
        let texts: Vec<&str> = self.content.iter().filter_map(Content::as_text).collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join(""))
        }
    }
}

/// A block of system-prompt content. May be marked cacheable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    pub cacheable: bool,
}

impl SystemBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), cacheable: false }
    }

    pub fn cacheable(text: impl Into<String>) -> Self {
        Self { text: text.into(), cacheable: true }
    }
}

/// How the model should pick a tool, if at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Any,
    None,
    Named(String),
}

/// A tool offered to the model for this request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Provider-native tool type tag, e.g. a text-editor tool that some
    /// vendors implement server-side. `None` for ordinary function tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    /// When true, the agent waits for the user instead of re-sending a
    /// tool_result after this tool runs.
    #[serde(default)]
    pub ends_turn: bool,
}

/// A provider-neutral request to complete one turn.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Vec<SystemBlock>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage for a single completed request (possibly the sum of an
/// original call plus one max-tokens escalation retry).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}

/// A fully materialized model response.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: Vec<Content>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub cost_usd: f64,
}

impl Response {
    pub fn as_message(&self) -> Message {
        Message { role: Role::Assistant, content: self.content.clone() }
    }

    pub fn tool_use_count(&self) -> usize {
        self.content.iter().filter(|c| matches!(c, Content::ToolUse { .. })).count()
    }
}
