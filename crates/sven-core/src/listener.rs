// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Observability hooks (C9): four notifications fired around every provider
//! call and every tool call, for UI timeline and structured-log collaborators.
//!
//! Listeners must not block — a slow listener stalls the conversation it is
//! attached to, since hooks run inline on the Agent Loop task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sven_model::content::{Content, Message, Response};

/// A lexicographically-sortable, monotonically-unique call ID: a
/// millisecond timestamp followed by a per-process sequence counter, both
/// zero-padded hex. Good enough to order events within one process without
/// pulling in a ULID dependency the rest of the workspace doesn't use.
pub fn next_call_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{millis:012x}-{seq:08x}")
}

/// Notifications fired in order around each API call and each tool call.
/// `call_id` identifies one occurrence; `convo_id` identifies the
/// conversation it happened on.
pub trait Listener: Send + Sync {
    fn on_request(&self, convo_id: &str, call_id: &str, outgoing: &Message) {
        let _ = (convo_id, call_id, outgoing);
    }
    fn on_response(&self, convo_id: &str, call_id: &str, response: &Response) {
        let _ = (convo_id, call_id, response);
    }
    fn on_tool_call(&self, convo_id: &str, call_id: &str, tool_use: &Content) {
        let _ = (convo_id, call_id, tool_use);
    }
    fn on_tool_result(&self, convo_id: &str, call_id: &str, tool_result: &Content) {
        let _ = (convo_id, call_id, tool_result);
    }
}

/// Default listener: does nothing. Used when no UI/logging collaborator is
/// attached.
pub struct NoopListener;

impl Listener for NoopListener {}

/// Emits a `tracing` event for each hook at `debug` level. The conversation
/// and parent IDs are expected to already be Skribe attributes on the
/// enclosing span (see [`crate::experiments::convo_span`]), so this listener
/// does not repeat them in the event fields beyond the call ID.
pub struct TracingListener;

impl Listener for TracingListener {
    fn on_request(&self, convo_id: &str, call_id: &str, outgoing: &Message) {
        tracing::debug!(convo_id, call_id, parts = outgoing.content.len(), "provider request");
    }

    fn on_response(&self, convo_id: &str, call_id: &str, response: &Response) {
        tracing::debug!(
            convo_id,
            call_id,
            stop_reason = ?response.stop_reason,
            cost_usd = response.cost_usd,
            "provider response"
        );
    }

    fn on_tool_call(&self, convo_id: &str, call_id: &str, tool_use: &Content) {
        if let Content::ToolUse { name, id, .. } = tool_use {
            tracing::debug!(convo_id, call_id, tool_use_id = %id, tool = %name, "tool call");
        }
    }

    fn on_tool_result(&self, convo_id: &str, call_id: &str, tool_result: &Content) {
        if let Content::ToolResult { tool_use_id, is_error, .. } = tool_result {
            tracing::debug!(convo_id, call_id, tool_use_id = %tool_use_id, is_error, "tool result");
        }
    }
}
