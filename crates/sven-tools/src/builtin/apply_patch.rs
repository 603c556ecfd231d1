// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sven_config::AgentMode;

use crate::builtin::patch_engine::{resolve_edit, EditBuffer, PatchError};
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ApplyPatchTool;

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str { "apply_patch" }

    fn description(&self) -> &str {
        "Apply a patch in the sven patch format to modify, add, or delete files.\n\
         Format:\n\
         *** Begin Patch\n\
         *** Add File: path/to/new_file.rs\n\
         +content line 1\n\
         +content line 2\n\
         *** Delete File: path/to/old_file.rs\n\
         *** Update File: path/to/existing.rs\n\
         @@ old text to replace\n\
         ++new text\n\
         *** End Patch\n\
         Each Update File hunk's old text is matched fuzzily (verbatim, then \
         trimmed, then whitespace-tolerant, then token-aware for Go source) \
         before falling back to failure; multiple hunks against the same file \
         are rejected if their matched spans overlap. Returns a summary of \
         applied changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The full patch text including *** Begin Patch and *** End Patch markers"
                }
            },
            "required": ["input"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }

    fn modes(&self) -> &[AgentMode] { &[AgentMode::Agent] }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let input = match call.args.get("input").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'input'"),
        };

        debug!("apply_patch tool");

        match apply_patch(&input).await {
            Ok(summary) => ToolOutput::ok(&call.id, summary),
            Err(e) => ToolOutput::err(&call.id, format!("patch error: {e}")),
        }
    }
}

/// One `@@`-delimited hunk inside an `*** Update File:` block: the text to
/// locate (`old`) and the text to replace it with (`new`), resolved through
/// [`resolve_edit`]'s strategy chain rather than a line-numbered diff.
struct Hunk {
    old: String,
    new: String,
}

async fn apply_patch(input: &str) -> anyhow::Result<String> {
    let begin = "*** Begin Patch";
    let end = "*** End Patch";

    let start = input.find(begin).ok_or_else(|| anyhow::anyhow!("'*** Begin Patch' not found"))?;
    let finish = input.find(end).ok_or_else(|| anyhow::anyhow!("'*** End Patch' not found"))?;
    if finish <= start {
        anyhow::bail!("'*** End Patch' appears before '*** Begin Patch'");
    }

    let body = &input[start + begin.len()..finish];
    let mut summary_lines: Vec<String> = Vec::new();
    let mut remaining = body;

    while !remaining.trim().is_empty() {
        remaining = remaining.trim_start_matches('\n');

        if remaining.starts_with("*** Add File: ") {
            let (path, rest) = parse_file_header(remaining, "*** Add File: ")?;
            let (content, rest2) = collect_add_content(rest);
            if let Some(parent) = std::path::Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(&path, &content).await?;
            summary_lines.push(format!("A {path}"));
            remaining = rest2;
        } else if remaining.starts_with("*** Delete File: ") {
            let (path, rest) = parse_file_header(remaining, "*** Delete File: ")?;
            if tokio::fs::metadata(&path).await.is_ok() {
                tokio::fs::remove_file(&path).await?;
            }
            summary_lines.push(format!("D {path}"));
            remaining = rest;
        } else if remaining.starts_with("*** Update File: ") {
            let (path, rest) = parse_file_header(remaining, "*** Update File: ")?;
            let (hunks, rest2) = collect_hunks(rest);
            let haystack = tokio::fs::read_to_string(&path).await.map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
            let new_content = apply_hunks(&haystack, &hunks).map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
            tokio::fs::write(&path, &new_content).await?;
            summary_lines.push(format!("M {path}"));
            remaining = rest2;
        } else {
            let next_newline = remaining.find('\n').unwrap_or(remaining.len());
            remaining = &remaining[next_newline..];
        }
    }

    if summary_lines.is_empty() {
        Ok("(no changes applied)".to_string())
    } else {
        Ok(summary_lines.join("\n"))
    }
}

/// Resolves every hunk against `haystack` and applies them through one
/// [`EditBuffer`] so overlapping matches are rejected instead of silently
/// clobbering each other.
fn apply_hunks(haystack: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let mut buffer = EditBuffer::new(haystack);
    for hunk in hunks {
        let spec = resolve_edit(haystack, &hunk.old, &hunk.new)?;
        buffer.stage(spec)?;
    }
    Ok(buffer.commit())
}

fn parse_file_header<'a>(s: &'a str, prefix: &str) -> anyhow::Result<(String, &'a str)> {
    let after_prefix = s.strip_prefix(prefix).ok_or_else(|| anyhow::anyhow!("expected '{prefix}'"))?;
    let newline = after_prefix.find('\n').unwrap_or(after_prefix.len());
    let path = after_prefix[..newline].trim().to_string();
    let rest = &after_prefix[newline..];
    Ok((path, rest))
}

fn collect_add_content(s: &str) -> (String, &str) {
    let mut lines: Vec<String> = Vec::new();
    let mut remaining = s;

    loop {
        remaining = remaining.strip_prefix('\n').unwrap_or(remaining);
        if remaining.starts_with("*** ") || remaining.is_empty() {
            break;
        }
        let newline = remaining.find('\n').unwrap_or(remaining.len());
        let line = &remaining[..newline];
        if let Some(content) = line.strip_prefix('+') {
            lines.push(content.to_string());
        } else {
            lines.push(line.to_string());
        }
        remaining = &remaining[newline..];
    }

    let content = lines.join("\n");
    let content = if content.ends_with('\n') { content } else { format!("{content}\n") };
    (content, remaining)
}

/// Parses `@@ old text... \n ++new text...` hunks. `@@` lines (and any
/// following lines without a `++` prefix) accumulate into the hunk's `old`
/// text; `++`-prefixed lines accumulate into `new`. A hunk ends at the next
/// `@@`, `++`, or `*** ` marker.
fn collect_hunks(s: &str) -> (Vec<Hunk>, &str) {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut remaining = s;

    loop {
        remaining = remaining.strip_prefix('\n').unwrap_or(remaining);
        if remaining.starts_with("*** ") || remaining.is_empty() {
            break;
        }

        if let Some(after) = remaining.strip_prefix("@@ ").or_else(|| remaining.strip_prefix("@@")) {
            let mut old_lines: Vec<&str> = Vec::new();
            let newline = after.find('\n').unwrap_or(after.len());
            old_lines.push(after[..newline].trim_start());
            remaining = &after[newline..];

            loop {
                remaining = remaining.strip_prefix('\n').unwrap_or(remaining);
                if remaining.starts_with("@@")
                    || remaining.starts_with("++")
                    || remaining.starts_with("*** ")
                    || remaining.is_empty()
                {
                    break;
                }
                let newline = remaining.find('\n').unwrap_or(remaining.len());
                old_lines.push(&remaining[..newline]);
                remaining = &remaining[newline..];
            }

            let mut new_lines: Vec<&str> = Vec::new();
            loop {
                let trimmed = remaining.strip_prefix('\n').unwrap_or(remaining);
                let Some(after) = trimmed.strip_prefix("++") else { break };
                let newline = after.find('\n').unwrap_or(after.len());
                new_lines.push(&after[..newline]);
                remaining = &after[newline..];
            }

            hunks.push(Hunk { old: old_lines.join("\n"), new: new_lines.join("\n") });
        } else {
            let newline = remaining.find('\n').unwrap_or(remaining.len());
            remaining = &remaining[newline..];
        }
    }

    (hunks, remaining)
}
