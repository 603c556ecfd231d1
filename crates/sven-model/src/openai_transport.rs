// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Raw, non-streaming OpenAI-compatible chat-completions transport.
//!
//! One struct serves every OpenAI-shaped vendor (OpenAI itself and the ~20
//! gateways that speak the same wire format) because the differences between
//! them are all data, not code: base URL, auth header style, and a handful of
//! extra headers/body fields. Retry, escalation and cost accounting live in
//! [`crate::adapter::RetryingAdapter`].

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{RawResult, RawTransport};
use crate::content::{Content, Message, Request, Role, StopReason, ToolChoice, Usage};
use crate::errors::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    ApiKeyHeader,
    None,
}

pub struct OpenAiTransport {
    driver_id: String,
    chat_url: String,
    api_key: Option<String>,
    auth_style: AuthStyle,
    extra_headers: Vec<(String, String)>,
    extra_body: Value,
    /// Newer OpenAI models reject "max_tokens" in favour of
    /// "max_completion_tokens" and reject an explicit temperature.
    reasoning_model: bool,
}

impl OpenAiTransport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_id: impl Into<String>,
        chat_url: impl Into<String>,
        api_key: Option<String>,
        auth_style: AuthStyle,
        extra_headers: Vec<(String, String)>,
        extra_body: Value,
        reasoning_model: bool,
    ) -> Self {
        Self {
            driver_id: driver_id.into(),
            chat_url: chat_url.into(),
            api_key,
            auth_style,
            extra_headers,
            extra_body,
            reasoning_model,
        }
    }

    fn build_body(&self, req: &Request, larger_output: bool) -> Value {
        let messages = build_messages(req);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| json!({ "type": "function", "function": { "name": t.name, "description": t.description, "parameters": t.input_schema } }))
            .collect();

        let max_tokens_key = if self.reasoning_model { "max_completion_tokens" } else { "max_tokens" };
        let max_tokens = if larger_output { req.max_tokens.max(4096) * 2 } else { req.max_tokens };

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": false,
            max_tokens_key: max_tokens,
        });

        if !self.reasoning_model {
            body["temperature"] = json!(0.2);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = tool_choice_to_wire(&req.tool_choice);
        }

        if let Some(map) = self.extra_body.as_object() {
            for (k, v) in map {
                body[k] = v.clone();
            }
        }

        body
    }
}

#[async_trait]
impl RawTransport for OpenAiTransport {
    fn provider_id(&self) -> &str {
        &self.driver_id
    }

    async fn send_once(&self, req: &Request, larger_output: bool) -> Result<RawResult, TransportError> {
        let body = self.build_body(req, larger_output);
        debug!(driver = %self.driver_id, model = %req.model, larger_output, "sending chat completion request");

        let client = reqwest::Client::new();
        let mut builder = client.post(&self.chat_url).json(&body);
        builder = match self.auth_style {
            AuthStyle::Bearer => {
                let key = self.api_key.as_deref().ok_or_else(|| {
                    TransportError::Decode("API key not set for bearer-auth provider".into())
                })?;
                builder.bearer_auth(key)
            }
            AuthStyle::ApiKeyHeader => {
                let key = self.api_key.as_deref().ok_or_else(|| {
                    TransportError::Decode("API key not set for api-key-header provider".into())
                })?;
                builder.header("api-key", key)
            }
            AuthStyle::None => builder,
        };
        for (name, val) in &self.extra_headers {
            builder = builder.header(name.as_str(), val.as_str());
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http { status, body: text });
        }

        let v: Value = resp.json().await.map_err(TransportError::Request)?;
        parse_response(&v)
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Named(name) => json!({ "type": "function", "function": { "name": name } }),
    }
}

/// Fold the provider-neutral message list into the OpenAI wire shape:
/// one leading system message, `tool_use` parts coalesced into a single
/// assistant message's `tool_calls` array, and each `tool_result` emitted
/// as its own `role: "tool"` message keyed by `tool_call_id`.
fn build_messages(req: &Request) -> Vec<Value> {
    let mut out = Vec::new();

    if !req.system.is_empty() {
        let combined = req.system.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n");
        out.push(json!({ "role": "system", "content": combined }));
    }

    for msg in &req.messages {
        push_message(&mut out, msg);
    }

    out
}

fn push_message(out: &mut Vec<Value>, msg: &Message) {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for c in &msg.content {
        match c {
            Content::Text { text } => text_parts.push(text.clone()),
            Content::Thinking { .. } | Content::RedactedThinking { .. } => {
                // OpenAI-compatible wire has no slot for opaque reasoning
                // blocks; they are provider-retained state, not replayed.
            }
            Content::ToolUse { id, name, input, .. } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() },
                }));
            }
            Content::ToolResult { tool_use_id, content, .. } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content.flatten_to_text(),
                }));
            }
        }
    }

    if text_parts.is_empty() && tool_calls.is_empty() {
        return;
    }

    let mut m = json!({ "role": role });
    if !text_parts.is_empty() {
        m["content"] = json!(text_parts.join(""));
    }
    if !tool_calls.is_empty() {
        m["tool_calls"] = json!(tool_calls);
    }
    out.push(m);
}

fn parse_response(v: &Value) -> Result<RawResult, TransportError> {
    let id = v["id"].as_str().unwrap_or_default().to_string();
    let model = v["model"].as_str().unwrap_or_default().to_string();
    let choice = &v["choices"][0];
    let message = &choice["message"];

    let mut content = Vec::new();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            content.push(Content::text(text.to_string()));
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for tc in calls {
            let id = tc["id"].as_str().unwrap_or_default().to_string();
            let name = tc["function"]["name"].as_str().unwrap_or_default().to_string();
            let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
            content.push(Content::tool_use(id, name, input));
        }
    }

    let stop_reason = match choice["finish_reason"].as_str().unwrap_or("stop") {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "stop" => StopReason::EndTurn,
        _ => StopReason::EndTurn,
    };

    let usage_v = &v["usage"];
    let cache_read_tokens = usage_v
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|t| t.as_u64())
        .or_else(|| usage_v.get("prompt_cache_hit_tokens").and_then(|t| t.as_u64()))
        .unwrap_or(0);
    let usage = Usage {
        input_tokens: usage_v["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage_v["completion_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens,
        cache_creation_tokens: 0,
    };

    Ok(RawResult { id, model, content, stop_reason, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SystemBlock;

    fn transport() -> OpenAiTransport {
        OpenAiTransport::new("openai", "https://api.openai.com/v1/chat/completions", Some("k".into()), AuthStyle::Bearer, vec![], json!({}), false)
    }

    #[test]
    fn system_blocks_fold_into_one_message() {
        let req = Request {
            model: "gpt-4o".into(),
            messages: vec![Message::user_text("hi")],
            system: vec![SystemBlock::new("a"), SystemBlock::new("b")],
            max_tokens: 100,
            ..Default::default()
        };
        let body = transport().build_body(&req, false);
        assert_eq!(build_messages(&req)[0]["content"], "a\n\nb");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn tool_result_becomes_its_own_tool_message() {
        let req = Request {
            model: "gpt-4o".into(),
            messages: vec![Message::user(vec![Content::tool_result("call_1", "42", false)])],
            max_tokens: 100,
            ..Default::default()
        };
        let msgs = build_messages(&req);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "call_1");
        assert_eq!(msgs[0]["content"], "42");
    }

    #[test]
    fn tool_uses_coalesce_into_one_assistant_message() {
        let req = Request {
            model: "gpt-4o".into(),
            messages: vec![Message::assistant(vec![
                Content::text("checking"),
                Content::tool_use("a", "grep", json!({"q": "x"})),
                Content::tool_use("b", "ls", json!({})),
            ])],
            max_tokens: 100,
            ..Default::default()
        };
        let msgs = build_messages(&req);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["tool_calls"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn reasoning_model_uses_max_completion_tokens_and_no_temperature() {
        let mut t = transport();
        t.reasoning_model = true;
        let req = Request { model: "o1".into(), messages: vec![Message::user_text("hi")], max_tokens: 50, ..Default::default() };
        let body = t.build_body(&req, false);
        assert!(body.get("max_completion_tokens").is_some());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_response_maps_finish_reason_length_to_max_tokens() {
        let v = json!({
            "id": "r1", "model": "gpt-4o",
            "choices": [{"message": {"content": "partial"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let r = parse_response(&v).unwrap();
        assert_eq!(r.stop_reason, StopReason::MaxTokens);
    }
}
