// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Raw, non-streaming Anthropic Messages API transport.
//!
//! Translates [`crate::content::Request`] to the `/v1/messages` wire body and
//! back, including the prompt-caching `cache_control` placement rules. Retry,
//! max-tokens escalation and cost accounting live one layer up in
//! [`crate::adapter::RetryingAdapter`] — this file only ever makes one call.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{RawResult, RawTransport};
use crate::content::{Content, Request, ResultPart, Role, StopReason, ToolResultBody, Usage};
use crate::errors::TransportError;

/// Minimum serialised content length (in bytes) for a tool result to be
/// eligible for explicit caching. Matches Anthropic's minimum cacheable
/// prompt length for Sonnet-class models (~1 024 tokens x 4 chars/token).
const TOOL_RESULT_CACHE_CHARS: usize = 4096;

pub struct AnthropicTransport {
    api_key: String,
    base_url: String,
    cache_system_prompt: bool,
    extended_cache_time: bool,
    cache_tools: bool,
    cache_conversation: bool,
    cache_images: bool,
    cache_tool_results: bool,
    client: reqwest::Client,
}

impl AnthropicTransport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        cache_system_prompt: bool,
        extended_cache_time: bool,
        cache_tools: bool,
        cache_conversation: bool,
        cache_images: bool,
        cache_tool_results: bool,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            cache_system_prompt,
            extended_cache_time,
            cache_tools,
            cache_conversation,
            cache_images,
            cache_tool_results,
            client: reqwest::Client::new(),
        }
    }

    fn cache_ctrl(&self) -> Value {
        if self.extended_cache_time {
            json!({ "type": "ephemeral", "ttl": "1h" })
        } else {
            json!({ "type": "ephemeral" })
        }
    }

    fn build_body(&self, req: &Request, larger_output: bool) -> Value {
        let cache_ctrl = self.cache_ctrl();
        let mut messages: Vec<Value> = req.messages.iter().map(|m| message_to_wire(m)).collect();

        let slots_used =
            self.cache_system_prompt as u8 + self.cache_tools as u8 + self.cache_conversation as u8;
        let avail = 4u8.saturating_sub(slots_used);
        if avail > 0 && (self.cache_images || self.cache_tool_results) {
            let mut added = 0u8;
            'outer: for msg in messages.iter_mut() {
                if let Some(content) = msg.get_mut("content").and_then(|c| c.as_array_mut()) {
                    for block in content.iter_mut() {
                        if added >= avail {
                            break 'outer;
                        }
                        let btype = block["type"].as_str().unwrap_or("");
                        let should_cache = (self.cache_images
                            && btype == "image"
                            && block.get("cache_control").is_none())
                            || (self.cache_tool_results
                                && btype == "tool_result"
                                && block.get("cache_control").is_none()
                                && block["content"].to_string().len() >= TOOL_RESULT_CACHE_CHARS);
                        if should_cache {
                            block["cache_control"] = cache_ctrl.clone();
                            added += 1;
                        }
                    }
                }
            }
        }

        let tools: Vec<Value> = if !req.tools.is_empty() && self.cache_tools {
            let last = req.tools.len() - 1;
            req.tools
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut v = json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    });
                    if i == last {
                        v["cache_control"] = cache_ctrl.clone();
                    }
                    v
                })
                .collect()
        } else {
            req.tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.input_schema }))
                .collect()
        };

        let max_tokens = if larger_output { req.max_tokens.max(4096) * 2 } else { req.max_tokens };

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": false,
        });

        if self.cache_conversation {
            body["cache_control"] = json!({ "type": "ephemeral" });
        }

        if !req.system.is_empty() {
            if self.cache_system_prompt {
                let system_blocks: Vec<Value> = req
                    .system
                    .iter()
                    .map(|s| {
                        let mut v = json!({ "type": "text", "text": s.text });
                        if s.cacheable {
                            v["cache_control"] = cache_ctrl.clone();
                        }
                        v
                    })
                    .collect();
                body["system"] = json!(system_blocks);
            } else {
                let combined = req.system.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n");
                body["system"] = json!(combined);
            }
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        body
    }

    fn betas(&self, larger_output: bool) -> Vec<&'static str> {
        let mut betas = Vec::new();
        let any_caching = self.cache_system_prompt
            || self.cache_tools
            || self.cache_conversation
            || self.cache_images
            || self.cache_tool_results;
        if any_caching {
            betas.push("prompt-caching-2024-07-31");
            if self.extended_cache_time {
                betas.push("extended-cache-ttl-2025-04-11");
            }
        }
        if larger_output {
            betas.push("output-128k-2025-02-19");
        }
        betas
    }
}

#[async_trait]
impl RawTransport for AnthropicTransport {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn send_once(&self, req: &Request, larger_output: bool) -> Result<RawResult, TransportError> {
        let body = self.build_body(req, larger_output);
        let betas = self.betas(larger_output);

        debug!(model = %req.model, larger_output, "sending anthropic request");

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        if !betas.is_empty() {
            builder = builder.header("anthropic-beta", betas.join(","));
        }

        let resp = builder.json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            if status == 529 {
                // Anthropic's "overloaded" status; treat like any other 5xx.
                return Err(TransportError::Http { status: 503, body: text });
            }
            return Err(TransportError::Http { status, body: text });
        }

        let v: Value = resp.json().await.map_err(TransportError::Request)?;
        parse_response(&v)
    }
}

fn message_to_wire(m: &crate::content::Message) -> Value {
    let role = match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = m.content.iter().map(content_to_wire).collect();
    json!({ "role": role, "content": content })
}

fn content_to_wire(c: &Content) -> Value {
    match c {
        Content::Text { text } => json!({ "type": "text", "text": text }),
        Content::Thinking { text, signature } => {
            let mut v = json!({ "type": "thinking", "thinking": text });
            if let Some(sig) = signature {
                v["signature"] = json!(sig);
            }
            v
        }
        Content::RedactedThinking { data } => json!({ "type": "redacted_thinking", "data": data }),
        Content::ToolUse { id, name, input, .. } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        Content::ToolResult { tool_use_id, content, is_error, .. } => {
            let wire_content = match content {
                ToolResultBody::Text(t) => json!(t),
                ToolResultBody::Parts(parts) => json!(parts
                    .iter()
                    .map(|p| match p {
                        ResultPart::Text { text } => json!({ "type": "text", "text": text }),
                        ResultPart::Image { image_url } =>
                            json!({ "type": "image", "source": { "type": "url", "url": image_url } }),
                    })
                    .collect::<Vec<_>>()),
            };
            json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": wire_content,
                "is_error": is_error,
            })
        }
    }
}

fn parse_response(v: &Value) -> Result<RawResult, TransportError> {
    let id = v["id"].as_str().unwrap_or_default().to_string();
    let model = v["model"].as_str().unwrap_or_default().to_string();

    let mut content = Vec::new();
    for block in v["content"].as_array().cloned().unwrap_or_default() {
        match block["type"].as_str().unwrap_or("") {
            "text" => content.push(Content::text(block["text"].as_str().unwrap_or("").to_string())),
            "thinking" => content.push(Content::Thinking {
                text: block["thinking"].as_str().unwrap_or("").to_string(),
                signature: block["signature"].as_str().map(str::to_string),
            }),
            "redacted_thinking" => {
                content.push(Content::RedactedThinking { data: block["data"].as_str().unwrap_or("").to_string() })
            }
            "tool_use" => content.push(Content::tool_use(
                block["id"].as_str().unwrap_or_default(),
                block["name"].as_str().unwrap_or_default(),
                block["input"].clone(),
            )),
            _ => {}
        }
    }

    let stop_reason = match v["stop_reason"].as_str().unwrap_or("end_turn") {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    };

    let usage_v = &v["usage"];
    let usage = Usage {
        input_tokens: usage_v["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage_v["output_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens: usage_v["cache_read_input_tokens"].as_u64().unwrap_or(0),
        cache_creation_tokens: usage_v["cache_creation_input_tokens"].as_u64().unwrap_or(0),
    };

    Ok(RawResult { id, model, content, stop_reason, usage })
}
