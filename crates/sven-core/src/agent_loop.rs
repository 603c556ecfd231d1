// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent Loop (C8): drives one user turn through
//! SEND → RECV → DECIDE → DISPATCH until the conversation parks on
//! WAIT_USER, hits an explicit shutdown, or a fatal provider error bubbles
//! up.
//!
//! The loop is single-threaded per conversation — callers must not invoke
//! [`run_turn`] again before a previous call returns, since both rely on
//! [`Conversation::send_message`]'s single-writer history invariant.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sven_model::content::{Message, Response, Role, StopReason};

use crate::conversation::{Conversation, ConversationError};

/// Why [`run_turn`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Model stopped normally; ready for the next user message.
    EndTurn,
    /// Model hit a stop sequence; ready for the next user message.
    StopSequence,
    /// A dispatched tool's descriptor has `ends_turn = true`; its result was
    /// appended to history but not sent back to the provider.
    EndsTurnTool,
    /// A dispatched tool returned the `do_not_respond` sentinel.
    DoNotRespond,
    /// The conversation (or an ancestor) is over budget; a notice message
    /// was appended to history and the loop parked.
    BudgetExceeded,
    /// `shutdown` fired mid-dispatch; outstanding tool calls were answered
    /// with cancellation results.
    Shutdown,
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub final_response: Response,
    pub ended_by: EndReason,
}

/// Drive one user turn to completion.
///
/// `shutdown` is a conversation-wide cancellation token (distinct from the
/// per-tool_use_id tokens `Conversation` manages internally): when it fires
/// mid-DISPATCH, outstanding tool calls are answered with cancel results
/// instead of letting them run to completion.
pub async fn run_turn(
    convo: &Arc<Conversation>,
    user_text: impl Into<String>,
    shutdown: &CancellationToken,
) -> Result<TurnOutcome, ConversationError> {
    let mut response = convo.send_message(Message::user_text(user_text)).await?;

    loop {
        match response.stop_reason {
            StopReason::EndTurn => return Ok(TurnOutcome { final_response: response, ended_by: EndReason::EndTurn }),
            StopReason::StopSequence => {
                return Ok(TurnOutcome { final_response: response, ended_by: EndReason::StopSequence })
            }
            StopReason::MaxTokens => {
                // The adapter already retried the truncated call once; resend
                // with no new user content to continue the same turn.
                response = convo.send_message(Message { role: Role::User, content: vec![] }).await?;
                continue;
            }
            StopReason::ToolUse => {
                let dispatch = tokio::select! {
                    outcome = convo.tool_result_contents(&response) => DispatchResult::Ran(outcome),
                    _ = shutdown.cancelled() => DispatchResult::Shutdown(convo.tool_result_cancel_contents(&response)),
                };

                match dispatch {
                    DispatchResult::Shutdown(contents) => {
                        convo.push_history(Message { role: Role::User, content: contents });
                        return Ok(TurnOutcome { final_response: response, ended_by: EndReason::Shutdown });
                    }
                    DispatchResult::Ran(outcome) if outcome.do_not_respond => {
                        return Ok(TurnOutcome { final_response: response, ended_by: EndReason::DoNotRespond });
                    }
                    DispatchResult::Ran(outcome) => {
                        let contents = outcome.contents;
                        if outcome.ends_turn {
                            convo.push_history(Message { role: Role::User, content: contents });
                            return Ok(TurnOutcome { final_response: response, ended_by: EndReason::EndsTurnTool });
                        }

                        if convo.over_budget() {
                            convo.push_history(Message { role: Role::User, content: contents });
                            let usage = convo.cumulative_usage();
                            let notice = format!(
                                "Budget exceeded: ${:.4} spent. Continue by sending another message.",
                                usage.total_cost_usd
                            );
                            convo.push_history(Message::user_text(notice));
                            return Ok(TurnOutcome { final_response: response, ended_by: EndReason::BudgetExceeded });
                        }

                        response = convo.send_message(Message { role: Role::User, content: contents }).await?;
                    }
                }
            }
        }
    }
}

enum DispatchResult {
    Ran(crate::conversation::ToolResultsOutcome),
    Shutdown(Vec<sven_model::content::Content>),
}
