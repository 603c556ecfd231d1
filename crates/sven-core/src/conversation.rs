// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation Engine (C5), Sub-conversation Tree (C6), and Budget
//! Controller (C7).
//!
//! A [`Conversation`] owns one provider-facing history and dispatches the
//! tool calls a response asks for. Sub-conversations (C6) are children in an
//! ancestor tree: each keeps its own usage scalars, but all of them share one
//! `tool_uses` counter map by reference, since the budget controller caps
//! total tool calls across the whole tree, not per branch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use sven_model::content::{Content, Message, Request, Response, Role, SystemBlock, ToolChoice};

use crate::listener::{next_call_id, Listener, NoopListener};
use crate::tool_body::{ToolBodyOutcome, ToolCallContext};
use crate::tool_registry::ToolTable;

/// Filler body for a `tool_use` that never got dispatched — e.g. the
/// conversation was torn down, or history repair found an assistant turn
/// whose results never arrived. Distinguished from [`USER_CANCELED_BODY`] so
/// a retry is known to be safe.
pub const NOT_EXECUTED_BODY: &str = "not executed; retry possible";

/// Filler body for a `tool_use` whose cancellation token fired before the
/// body returned.
pub const USER_CANCELED_BODY: &str = "user canceled this tool_use";

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("provider error: {0}")]
    Provider(#[from] sven_model::errors::ProviderError),
    #[error("conversation is over budget")]
    OverBudget,
}

/// A dollar ceiling for one conversation level. `max_dollars <= 0.0` means
/// unlimited.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub max_dollars: f64,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self { max_dollars: 0.0 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_dollars <= 0.0
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Usage scalars owned independently by one conversation level.
///
/// `tool_uses` is the one exception: it is a literal `Arc` shared across
/// every level of the tree so a parent and its sub-conversations are counted
/// against the same per-tool call budget.
#[derive(Clone)]
pub struct CumulativeUsage {
    pub start_time: Instant,
    pub responses: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_cost_usd: f64,
    pub tool_uses: Arc<Mutex<HashMap<String, u64>>>,
}

impl CumulativeUsage {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            responses: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            total_cost_usd: 0.0,
            tool_uses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn child(&self) -> Self {
        Self {
            start_time: Instant::now(),
            responses: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            total_cost_usd: 0.0,
            tool_uses: self.tool_uses.clone(),
        }
    }

    fn record_response(&mut self, resp: &Response) {
        self.responses += 1;
        self.input_tokens += resp.usage.input_tokens;
        self.output_tokens += resp.usage.output_tokens;
        self.cache_read_tokens += resp.usage.cache_read_tokens;
        self.cache_creation_tokens += resp.usage.cache_creation_tokens;
        self.total_cost_usd += resp.cost_usd;
    }

    fn record_tool_use(&self, tool_name: &str) {
        let mut uses = self.tool_uses.lock().unwrap();
        *uses.entry(tool_name.to_string()).or_insert(0) += 1;
    }
}

/// A snapshot returned by [`Conversation::cumulative_usage`]: this
/// conversation's own scalars plus every ancestor's, aggregated, and the
/// tree-wide tool call counts.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub responses: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_cost_usd: f64,
    pub tool_uses: HashMap<String, u64>,
}

/// Result of dispatching every `tool_use` part of one response.
pub struct ToolResultsOutcome {
    /// `tool_result` content parts, in the same order as the `tool_use`
    /// parts they answer. Omits any call whose body returned
    /// [`ToolBodyOutcome::DoNotRespond`].
    pub contents: Vec<Content>,
    /// Set if any call returned [`ToolBodyOutcome::DoNotRespond`] (boundary
    /// 10): the agent loop should return to WAIT_USER instead of sending
    /// `contents` back to the provider.
    pub do_not_respond: bool,
    /// OR of `ends_turn` across every tool descriptor attempted in this
    /// batch, regardless of whether the call succeeded. The agent loop
    /// parks on WAIT_USER instead of re-sending when this is set.
    pub ends_turn: bool,
}

/// One node in the conversation tree (C5/C6). Always held behind an `Arc` so
/// `parent` links and `ToolCallContext::conversation` handles stay valid
/// independent of whoever is driving the agent loop.
pub struct Conversation {
    self_weak: Weak<Conversation>,
    pub id: String,
    pub parent: Option<Arc<Conversation>>,
    provider: Arc<dyn sven_model::ContentProvider>,
    tools: Arc<ToolTable>,
    system_prompt: Vec<SystemBlock>,
    history: Mutex<Vec<Message>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    usage: Mutex<CumulativeUsage>,
    budget: Mutex<Budget>,
    model: String,
    max_tokens: u32,
    tool_choice: ToolChoice,
    listener: Arc<dyn Listener>,
}

impl Conversation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn sven_model::ContentProvider>,
        tools: Arc<ToolTable>,
        system_prompt: Vec<SystemBlock>,
        model: impl Into<String>,
        max_tokens: u32,
        budget: Budget,
        listener: Arc<dyn Listener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            id: id.into(),
            parent: None,
            provider,
            tools,
            system_prompt,
            history: Mutex::new(Vec::new()),
            cancels: Mutex::new(HashMap::new()),
            usage: Mutex::new(CumulativeUsage::new()),
            budget: Mutex::new(budget),
            model: model.into(),
            max_tokens,
            tool_choice: ToolChoice::Auto,
            listener,
        })
    }

    /// Recovers the `Arc` this conversation is held behind. Every
    /// `Conversation` is constructed through [`Conversation::new`] or
    /// [`Conversation::sub_convo_with_history`], both of which wire this up
    /// via `Arc::new_cyclic`, so the upgrade cannot fail.
    fn arc_self(&self) -> Arc<Conversation> {
        self.self_weak.upgrade().expect("conversation not held behind an Arc")
    }

    pub fn with_default_listener(
        id: impl Into<String>,
        provider: Arc<dyn sven_model::ContentProvider>,
        tools: Arc<ToolTable>,
        system_prompt: Vec<SystemBlock>,
        model: impl Into<String>,
        max_tokens: u32,
        budget: Budget,
    ) -> Arc<Self> {
        Self::new(id, provider, tools, system_prompt, model, max_tokens, budget, Arc::new(NoopListener))
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().unwrap().clone()
    }

    pub fn push_history(&self, msg: Message) {
        self.history.lock().unwrap().push(msg);
    }

    // ── C6: sub-conversation tree ──────────────────────────────────────

    /// Open a child conversation with empty history, sharing this tree's
    /// tool-use counters and inheriting the provider, tool table, and
    /// budget ceiling (the child gets its own spend counter; [`over_budget`]
    /// still walks up to the parent's).
    pub fn sub_convo(&self, id: impl Into<String>) -> Arc<Conversation> {
        self.sub_convo_with_history(id, Vec::new())
    }

    /// As [`sub_convo`], seeding the child's history instead of starting
    /// empty — used when a tool wants an auxiliary model call that should
    /// see the parent's conversation so far (§4.6).
    pub fn sub_convo_with_history(&self, id: impl Into<String>, history: Vec<Message>) -> Arc<Conversation> {
        Arc::new_cyclic(|weak| Conversation {
            self_weak: weak.clone(),
            id: id.into(),
            parent: Some(self.arc_self()),
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            system_prompt: self.system_prompt.clone(),
            history: Mutex::new(history),
            cancels: Mutex::new(HashMap::new()),
            usage: Mutex::new(self.usage.lock().unwrap().child()),
            budget: Mutex::new(*self.budget.lock().unwrap()),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            tool_choice: self.tool_choice.clone(),
            listener: self.listener.clone(),
        })
    }

    // ── C7: budget controller ──────────────────────────────────────────

    /// True if this conversation or any ancestor has exceeded its own
    /// budget ceiling. Each level is checked against its own spend, not an
    /// aggregate — a child under a generous parent can still trip its own
    /// tighter cap.
    pub fn over_budget(&self) -> bool {
        let mut node = Some(self);
        while let Some(c) = node {
            let budget = *c.budget.lock().unwrap();
            if !budget.is_unlimited() {
                let spent = c.usage.lock().unwrap().total_cost_usd;
                if spent >= budget.max_dollars {
                    return true;
                }
            }
            node = c.parent.as_deref();
        }
        false
    }

    /// Sets the local budget to `new_budget`, but — if it carries a positive
    /// ceiling — adds the already-spent total to it first, so the fresh
    /// allowance is `new_budget.max_dollars` more spend starting from now
    /// rather than a reset back to zero. Does not touch ancestors or the
    /// shared tool-use counts.
    pub fn reset_budget(&self, new_budget: Budget) {
        let spent = self.usage.lock().unwrap().total_cost_usd;
        let mut budget = self.budget.lock().unwrap();
        *budget = if new_budget.max_dollars > 0.0 {
            Budget { max_dollars: new_budget.max_dollars + spent }
        } else {
            new_budget
        };
    }

    pub fn set_budget(&self, budget: Budget) {
        *self.budget.lock().unwrap() = budget;
    }

    /// Whether the named tool's descriptor has `ends_turn = true` — the
    /// agent loop checks this after dispatch to decide whether to re-send.
    pub fn tool_ends_turn(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.descriptor().ends_turn).unwrap_or(false)
    }

    /// This conversation's own usage plus every ancestor's, aggregated, and
    /// the tree-wide (shared) tool-use counts.
    pub fn cumulative_usage(&self) -> UsageSnapshot {
        let mut snap = UsageSnapshot::default();
        let mut node = Some(self);
        while let Some(c) = node {
            let u = c.usage.lock().unwrap();
            snap.responses += u.responses;
            snap.input_tokens += u.input_tokens;
            snap.output_tokens += u.output_tokens;
            snap.cache_read_tokens += u.cache_read_tokens;
            snap.cache_creation_tokens += u.cache_creation_tokens;
            snap.total_cost_usd += u.total_cost_usd;
            node = c.parent.as_deref();
        }
        snap.tool_uses = self.usage.lock().unwrap().tool_uses.lock().unwrap().clone();
        snap
    }

    // ── C5: sending ─────────────────────────────────────────────────────

    pub async fn send_user_text(&self, text: impl Into<String>) -> Result<Response, ConversationError> {
        self.send_message(Message::user_text(text)).await
    }

    /// Appends `msg` to history (after repairing any assistant turn left
    /// with missing tool results, §4.5), sends the full history to the
    /// provider, appends the assistant reply, and returns it.
    pub async fn send_message(&self, msg: Message) -> Result<Response, ConversationError> {
        if self.over_budget() {
            return Err(ConversationError::OverBudget);
        }

        {
            let mut history = self.history.lock().unwrap();
            insert_missing_tool_results(&mut history);
            if !msg.content.is_empty() {
                history.push(msg.clone());
            }
        }

        let call_id = next_call_id();
        self.listener.on_request(&self.id, &call_id, &msg);

        let req = Request {
            model: self.model.clone(),
            messages: self.history.lock().unwrap().clone(),
            system: self.system_prompt.clone(),
            tools: self.tools.descriptors(),
            tool_choice: self.tool_choice.clone(),
            max_tokens: self.max_tokens,
        };

        let resp = self.provider.do_request(req).await?;
        self.listener.on_response(&self.id, &call_id, &resp);

        self.usage.lock().unwrap().record_response(&resp);
        self.history.lock().unwrap().push(resp.as_message());

        Ok(resp)
    }

    // ── C2/C8: tool dispatch ────────────────────────────────────────────

    /// Run every `tool_use` part of `response` against the tool table,
    /// concurrently, racing each against its own cancellation token.
    pub async fn tool_result_contents(&self, response: &Response) -> ToolResultsOutcome {
        let tool_uses: Vec<&Content> =
            response.content.iter().filter(|c| matches!(c, Content::ToolUse { .. })).collect();

        let mut futures = Vec::with_capacity(tool_uses.len());
        for content in &tool_uses {
            let (id, name, input) = match content {
                Content::ToolUse { id, name, input, .. } => (id.clone(), name.clone(), input.clone()),
                _ => unreachable!(),
            };
            futures.push(self.dispatch_one(id, name, input));
        }

        let results = futures::future::join_all(futures).await;
        let mut contents = Vec::with_capacity(results.len());
        let mut do_not_respond = false;
        let mut ends_turn = false;
        for (tool_use_id, name, outcome) in results {
            self.listener.on_tool_call(&self.id, &tool_use_id, &Content::tool_use(tool_use_id.clone(), name.clone(), serde_json::Value::Null));
            if self.tools.get(&name).map(|t| t.descriptor().ends_turn).unwrap_or(false) {
                ends_turn = true;
            }
            match outcome {
                ToolBodyOutcome::Text(body) => {
                    let result = Content::tool_result(tool_use_id.clone(), body, false);
                    self.listener.on_tool_result(&self.id, &tool_use_id, &result);
                    contents.push(result);
                }
                ToolBodyOutcome::Error(body) => {
                    let result = Content::tool_result(tool_use_id.clone(), body, true);
                    self.listener.on_tool_result(&self.id, &tool_use_id, &result);
                    contents.push(result);
                }
                ToolBodyOutcome::DoNotRespond => {
                    do_not_respond = true;
                }
            }
            self.cancels.lock().unwrap().remove(&tool_use_id);
        }

        ToolResultsOutcome { contents, do_not_respond, ends_turn }
    }

    async fn dispatch_one(&self, tool_use_id: String, name: String, input: serde_json::Value) -> (String, String, ToolBodyOutcome) {
        let cancel = CancellationToken::new();
        self.cancels.lock().unwrap().insert(tool_use_id.clone(), cancel.clone());

        let Some(body) = self.tools.get(&name).cloned() else {
            return (tool_use_id.clone(), name, ToolBodyOutcome::Error(format!("unknown tool: {name}")));
        };
        self.usage.lock().unwrap().record_tool_use(&name);

        let ctx = ToolCallContext { tool_use_id: tool_use_id.clone(), cancel: cancel.clone(), conversation: self.arc_self() };
        let outcome = tokio::select! {
            outcome = body.call(input, ctx) => outcome,
            _ = cancel.cancelled() => ToolBodyOutcome::Error(USER_CANCELED_BODY.to_string()),
        };
        (tool_use_id, name, outcome)
    }

    /// Cancel one outstanding `tool_use` by id. A no-op if it has already
    /// finished or was never dispatched.
    pub fn cancel_tool_use(&self, tool_use_id: &str) {
        if let Some(token) = self.cancels.lock().unwrap().get(tool_use_id) {
            token.cancel();
        }
    }

    /// Produce `tool_result` parts for every `tool_use` in `response`
    /// without running any of them — used when the conversation is shutting
    /// down mid-turn and the pending calls must still be answered so the
    /// history stays well-formed.
    pub fn tool_result_cancel_contents(&self, response: &Response) -> Vec<Content> {
        response
            .content
            .iter()
            .filter_map(|c| match c {
                Content::ToolUse { id, .. } => Some(Content::tool_result(id.clone(), USER_CANCELED_BODY, true)),
                _ => None,
            })
            .collect()
    }
}

/// Repairs a history whose last assistant turn requested tool calls that
/// never got answered (the process crashed or was interrupted mid-turn).
///
/// Fires only when **every** `tool_use` in that turn is missing its result —
/// a partially-answered turn is left alone, since inventing results for the
/// already-answered half would silently rewrite real tool output.
pub fn insert_missing_tool_results(history: &mut Vec<Message>) {
    let Some(last_assistant_idx) = history.iter().rposition(|m| m.role == Role::Assistant) else {
        return;
    };
    let tool_use_ids: Vec<String> = history[last_assistant_idx]
        .content
        .iter()
        .filter_map(|c| match c {
            Content::ToolUse { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect();
    if tool_use_ids.is_empty() {
        return;
    }

    let answered: std::collections::HashSet<&str> = history[last_assistant_idx + 1..]
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| match c {
            Content::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect();

    if tool_use_ids.iter().any(|id| answered.contains(id.as_str())) {
        return;
    }

    let filler: Vec<Content> = tool_use_ids
        .into_iter()
        .map(|id| Content::tool_result(id, NOT_EXECUTED_BODY, true))
        .collect();
    history.push(Message { role: Role::User, content: filler });
}
