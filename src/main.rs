// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal headless harness for exercising the agentic conversation core.
//!
//! This binary is a smoke-test entry point, not a product CLI: it loads
//! configuration, dials any configured MCP servers, builds one conversation,
//! and drives it with a single line of text read from stdin. The terminal
//! UI, CI runner, and packaging that the teacher built on top of this core
//! are out of scope here.

use std::io::{self, Read};

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = sven_config::load(None).context("loading configuration")?;

    let mut input = String::new();
    io::stdin().read_to_string(&mut input).context("reading stdin")?;
    let input = input.trim();
    if input.is_empty() {
        println!("usage: pipe a line of text on stdin to start a one-turn conversation");
        return Ok(());
    }

    let (mcp, mcp_errors) = sven_mcp_client::McpMultiplexer::connect_all(&config.mcp_servers).await;
    for err in &mcp_errors {
        tracing::warn!(error = %err, "failed to connect to an MCP server");
    }
    let mcp_tools = mcp.tools();

    let agent = sven_core::Agent::new(&config, "You are sven, an agentic coding assistant.", mcp_tools)
        .context("building agent")?;

    let outcome = agent.send_user_text(input).await?;
    if let Some(text) = outcome.final_response.as_message().as_text() {
        println!("{text}");
    }
    tracing::debug!(ended_by = ?outcome.ended_by, "turn ended");

    let usage = agent.cumulative_usage();
    tracing::info!(
        cost_usd = usage.total_cost_usd,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "turn complete"
    );

    mcp.shutdown().await;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(io::stderr)).init();
}
