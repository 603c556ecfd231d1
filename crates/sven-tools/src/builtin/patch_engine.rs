// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fuzzy text-replacement engine behind the `apply_patch` tool.
//!
//! An edit is a `(old_text, new_text)` pair against a haystack. Five
//! strategies run in order and the first success wins: verbatim unique
//! search, a trimmed-first-line retry, whitespace-tolerant line matching,
//! token-aligned matching for Go source, and a whitespace-tolerant match
//! that refuses to touch a multi-line string or comment. Accepted matches
//! are minimized and staged into an [`EditBuffer`], which rejects
//! overlapping edits before committing them all at once.

use thiserror::Error;
use tree_sitter::Node;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("old_text not found in file")]
    NoMatch,
    #[error("old_text matches more than once; add context to disambiguate")]
    AmbiguousMatch,
    #[error("match overlaps a multi-line string or comment; whitespace there is significant")]
    InvalidRegion,
}

/// One accepted match: the byte span `[offset, offset+length)` of `src` to
/// replace with `new`. `old` is kept for [`minimize`](PatchSpec::minimize)
/// and for the offset/length recomputation it performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    pub offset: usize,
    pub length: usize,
    pub src: String,
    pub old: String,
    pub new: String,
}

impl PatchSpec {
    fn new(src: &str, offset: usize, old: &str, new: &str) -> Self {
        Self { offset, length: old.len(), src: src.to_string(), old: old.to_string(), new: new.to_string() }
    }

    /// Shrinks the edit by stripping the common prefix and suffix of `old`
    /// and `new`, narrowing `offset`/`length` to match. A no-op replacement
    /// (old == new) minimizes to a zero-length span.
    pub fn minimize(&mut self) {
        let old_chars: Vec<char> = self.old.chars().collect();
        let new_chars: Vec<char> = self.new.chars().collect();

        let mut prefix = 0;
        while prefix < old_chars.len() && prefix < new_chars.len() && old_chars[prefix] == new_chars[prefix] {
            prefix += 1;
        }

        let mut suffix = 0;
        let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
        while suffix < max_suffix
            && old_chars[old_chars.len() - 1 - suffix] == new_chars[new_chars.len() - 1 - suffix]
        {
            suffix += 1;
        }

        let old_trimmed: String = old_chars[prefix..old_chars.len() - suffix].iter().collect();
        let new_trimmed: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
        let prefix_bytes: usize = old_chars[..prefix].iter().map(|c| c.len_utf8()).sum();

        self.offset += prefix_bytes;
        self.length = old_trimmed.len();
        self.old = old_trimmed;
        self.new = new_trimmed;
    }

    /// Applies this spec to `src` in isolation, for tests and single-edit
    /// callers; multi-edit callers go through [`EditBuffer`] instead.
    pub fn apply(&self) -> String {
        format!("{}{}{}", &self.src[..self.offset], self.new, &self.src[self.offset + self.length..])
    }
}

/// Batches [`PatchSpec`]s against one source buffer, by offset, and rejects
/// edits whose spans overlap an already-staged one.
pub struct EditBuffer {
    src: String,
    edits: Vec<PatchSpec>,
}

impl EditBuffer {
    pub fn new(src: impl Into<String>) -> Self {
        Self { src: src.into(), edits: Vec::new() }
    }

    pub fn stage(&mut self, spec: PatchSpec) -> Result<(), PatchError> {
        let (start, end) = (spec.offset, spec.offset + spec.length);
        for existing in &self.edits {
            let (existing_start, existing_end) = (existing.offset, existing.offset + existing.length);
            if start < existing_end && existing_start < end {
                return Err(PatchError::AmbiguousMatch);
            }
        }
        self.edits.push(spec);
        Ok(())
    }

    /// Applies every staged edit and returns the resulting buffer. Edits are
    /// applied in offset order; their spans were already verified disjoint
    /// at `stage` time.
    pub fn commit(self) -> String {
        let mut edits = self.edits;
        edits.sort_by_key(|e| e.offset);

        let mut out = String::with_capacity(self.src.len());
        let mut cursor = 0;
        for edit in &edits {
            out.push_str(&self.src[cursor..edit.offset]);
            out.push_str(&edit.new);
            cursor = edit.offset + edit.length;
        }
        out.push_str(&self.src[cursor..]);
        out
    }
}

fn count_verbatim(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

/// Strategy 1: verbatim search, accepted only on a unique hit.
pub fn unique(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    match count_verbatim(haystack, old) {
        0 => Err(PatchError::NoMatch),
        1 => {
            let offset = haystack.find(old).expect("count_verbatim confirmed a match");
            let mut spec = PatchSpec::new(haystack, offset, old, new);
            spec.minimize();
            Ok(spec)
        }
        _ => Err(PatchError::AmbiguousMatch),
    }
}

/// Strategy 2: if `old` and `new` share an identical first line, strip it
/// from both and retry [`unique`].
pub fn unique_trim(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    let old_first = old.lines().next().unwrap_or("");
    let new_first = new.lines().next().unwrap_or("");
    if old_first.is_empty() || old_first != new_first {
        return Err(PatchError::NoMatch);
    }
    unique(haystack, strip_first_line(old), strip_first_line(new))
}

fn strip_first_line(s: &str) -> &str {
    match s.find('\n') {
        Some(i) => &s[i + 1..],
        None => "",
    }
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Finds the haystack-line window matching `old`'s trimmed lines exactly
/// once, and reconstructs `old`/`new` using the haystack's indentation.
/// Shared by [`unique_dedent`] and [`unique_in_valid_go`] — the spec
/// guarantees they agree (property 8: dedent succeeds iff
/// `Unique(h, adjust(n), adjust(r))` succeeds), so both strategies funnel
/// through this before diverging on the multi-line-token check.
fn dedent_match(haystack: &str, old: &str, new: &str) -> Result<(usize, String, String), PatchError> {
    let old_trimmed: Vec<&str> = old.lines().map(str::trim).collect();
    if old_trimmed.is_empty() {
        return Err(PatchError::NoMatch);
    }
    let haystack_lines: Vec<&str> = haystack.lines().collect();
    let n = old_trimmed.len();

    let mut starts = Vec::new();
    if haystack_lines.len() >= n {
        for start in 0..=haystack_lines.len() - n {
            if (0..n).all(|i| haystack_lines[start + i].trim() == old_trimmed[i]) {
                starts.push(start);
            }
        }
    }
    let start = match starts.len() {
        0 => return Err(PatchError::NoMatch),
        1 => starts[0],
        _ => return Err(PatchError::AmbiguousMatch),
    };

    let adjusted_old = (0..n)
        .map(|i| format!("{}{}", leading_whitespace(haystack_lines[start + i]), old_trimmed[i]))
        .collect::<Vec<_>>()
        .join("\n");

    let new_lines: Vec<&str> = new.lines().collect();
    let adjusted_new = new_lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let indent_line = haystack_lines[start + i.min(n - 1)];
            format!("{}{}", leading_whitespace(indent_line), line.trim())
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok((start, adjusted_old, adjusted_new))
}

/// Strategy 3: whitespace-tolerant line match, rewritten onto the
/// haystack's real indentation and re-verified through [`unique`].
pub fn unique_dedent(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    let (_, adjusted_old, adjusted_new) = dedent_match(haystack, old, new)?;
    unique(haystack, &adjusted_old, &adjusted_new)
}

struct GoToken {
    text: String,
    start: usize,
    end: usize,
}

fn parse_go(src: &str) -> Option<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&tree_sitter_go::LANGUAGE.into()).ok()?;
    parser.parse(src, None)
}

fn collect_leaf_tokens(node: Node<'_>, src: &[u8], out: &mut Vec<GoToken>) {
    if node.child_count() == 0 {
        if node.end_byte() > node.start_byte() {
            if let Ok(text) = node.utf8_text(src) {
                out.push(GoToken { text: text.to_string(), start: node.start_byte(), end: node.end_byte() });
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_leaf_tokens(child, src, out);
    }
}

/// Tokenizes `src` as Go. When `require_clean` is set, returns `None` if the
/// parse carries any error node — the caller treats that as "not the target
/// language of interest" and falls through to the next strategy. `old`/`new`
/// snippets are rarely complete, parseable files on their own (no package
/// clause), so they're tokenized leniently: tree-sitter's error recovery
/// still yields correct lexical tokens under the `ERROR` node in practice.
fn go_tokens(src: &str, require_clean: bool) -> Option<Vec<GoToken>> {
    let tree = parse_go(src)?;
    let root = tree.root_node();
    if require_clean && root.has_error() {
        return None;
    }
    let mut tokens = Vec::new();
    collect_leaf_tokens(root, src.as_bytes(), &mut tokens);
    Some(tokens)
}

/// Strategy 4: Go-token-aligned match, used only when the whole haystack
/// parses as valid Go. Tokenizes `old` and `haystack`, requires exactly one
/// contiguous token-sequence match, aligns the span to full token
/// boundaries, then re-derives a [`PatchSpec`] from that byte range.
pub fn unique_go_tokens(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    let hay_tokens = go_tokens(haystack, true).ok_or(PatchError::NoMatch)?;
    let old_tokens = go_tokens(old, false).ok_or(PatchError::NoMatch)?;
    if old_tokens.is_empty() || hay_tokens.len() < old_tokens.len() {
        return Err(PatchError::NoMatch);
    }

    let n = old_tokens.len();
    let mut starts = Vec::new();
    for start in 0..=hay_tokens.len() - n {
        if (0..n).all(|i| hay_tokens[start + i].text == old_tokens[i].text) {
            starts.push(start);
        }
    }
    let start = match starts.len() {
        0 => return Err(PatchError::NoMatch),
        1 => starts[0],
        _ => return Err(PatchError::AmbiguousMatch),
    };

    let byte_start = hay_tokens[start].start;
    let byte_end = hay_tokens[start + n - 1].end;
    let mut spec = PatchSpec::new(haystack, byte_start, &haystack[byte_start..byte_end], new);
    spec.minimize();
    Ok(spec)
}

/// True if `[start, end)` overlaps a Go string literal or comment node that
/// spans more than one line — inside those, whitespace is part of the
/// value, so the dedent rewrite in [`dedent_match`] would corrupt it.
fn overlaps_multiline_token(tree: &tree_sitter::Tree, start: usize, end: usize) -> bool {
    fn walk(node: Node<'_>, start: usize, end: usize) -> bool {
        let is_literal_kind = matches!(node.kind(), "interpreted_string_literal" | "raw_string_literal" | "comment");
        if is_literal_kind && node.start_byte() < node.end_byte() {
            let spans_lines = node.start_position().row != node.end_position().row;
            let overlaps = node.start_byte() < end && start < node.end_byte();
            if spans_lines && overlaps {
                return true;
            }
        }
        let mut cursor = node.walk();
        let any_match = node.children(&mut cursor).any(|child| walk(child, start, end));
        any_match
    }
    walk(tree.root_node(), start, end)
}

/// Strategy 5: the same whitespace-tolerant match as [`unique_dedent`], but
/// rejected outright if the matched region overlaps a multi-line Go string
/// literal or comment. Unlike strategy 4, this doesn't require the whole
/// haystack to parse cleanly — `tree-sitter` still produces a best-effort
/// tree for malformed input, which is enough to locate literals.
pub fn unique_in_valid_go(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    let (start_line, adjusted_old, adjusted_new) = dedent_match(haystack, old, new)?;

    let offset = haystack
        .find(&adjusted_old)
        .ok_or(PatchError::NoMatch)
        .inspect_err(|_| {
            tracing::debug!(start_line, "dedent reconstruction did not match haystack verbatim");
        })?;
    let end = offset + adjusted_old.len();

    if let Some(tree) = parse_go(haystack) {
        if overlaps_multiline_token(&tree, offset, end) {
            return Err(PatchError::InvalidRegion);
        }
    }

    let mut spec = PatchSpec::new(haystack, offset, &adjusted_old, &adjusted_new);
    spec.minimize();
    Ok(spec)
}

/// Runs all five strategies in order, returning the first success.
pub fn resolve_edit(haystack: &str, old: &str, new: &str) -> Result<PatchSpec, PatchError> {
    unique(haystack, old, new)
        .or_else(|_| unique_trim(haystack, old, new))
        .or_else(|_| unique_dedent(haystack, old, new))
        .or_else(|_| unique_go_tokens(haystack, old, new))
        .or_else(|_| unique_in_valid_go(haystack, old, new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_succeeds_on_single_occurrence() {
        let spec = unique("abcXdef", "X", "Y").unwrap();
        assert_eq!(spec.apply(), "abcYdef");
    }

    #[test]
    fn unique_rejects_zero_and_many_matches() {
        assert_eq!(unique("abc", "X", "Y"), Err(PatchError::NoMatch));
        assert_eq!(unique("aXbXc", "X", "Y"), Err(PatchError::AmbiguousMatch));
    }

    #[test]
    fn minimize_shrinks_common_prefix_and_suffix() {
        let mut spec = PatchSpec::new("fn foo() {}", 3, "foo() {}", "bar() {}");
        spec.minimize();
        assert_eq!(spec.old, "foo");
        assert_eq!(spec.new, "bar");
        assert_eq!(spec.offset, 3);
    }

    #[test]
    fn minimize_preserves_final_buffer_property_7() {
        let without = unique("let x = foo_value;", "foo_value", "bar_value").unwrap();
        let mut with_minimize = without.clone();
        with_minimize.minimize();
        assert_eq!(without.apply(), with_minimize.apply());
    }

    #[test]
    fn unique_trim_strips_shared_first_line() {
        let haystack = "fn f() {\n    let a = 1;\n    let b = 2;\n}\n";
        let old = "fn f() {\n    let a = 1;";
        let new = "fn f() {\n    let a = 10;";
        let spec = unique_trim(haystack, old, new).unwrap();
        assert!(spec.apply().contains("let a = 10;"));
    }

    #[test]
    fn unique_dedent_matches_despite_whitespace_difference() {
        let haystack = "fn f() {\n\tlet a = 1;\n}\n";
        let old = "  let a = 1;";
        let new = "  let a = 2;";
        let spec = unique_dedent(haystack, old, new).unwrap();
        assert_eq!(spec.apply(), "fn f() {\n\tlet a = 2;\n}\n");
    }

    #[test]
    fn dedent_property_8_matches_direct_unique_on_adjusted_text() {
        let haystack = "fn f() {\n\tlet a = 1;\n}\n";
        let old = "  let a = 1;";
        let new = "  let a = 2;";
        let dedent_result = unique_dedent(haystack, old, new);
        let (_, adjusted_old, adjusted_new) = dedent_match(haystack, old, new).unwrap();
        let direct_result = unique(haystack, &adjusted_old, &adjusted_new);
        assert_eq!(dedent_result.is_ok(), direct_result.is_ok());
    }

    #[test]
    fn edit_buffer_rejects_overlapping_edits() {
        let src = "0123456789";
        let mut buf = EditBuffer::new(src);
        buf.stage(PatchSpec::new(src, 2, "234", "X")).unwrap();
        let err = buf.stage(PatchSpec::new(src, 3, "345", "Y")).unwrap_err();
        assert_eq!(err, PatchError::AmbiguousMatch);
    }

    #[test]
    fn edit_buffer_applies_disjoint_edits_by_offset_property_6() {
        let src = "0123456789";
        let mut buf = EditBuffer::new(src);
        buf.stage(PatchSpec::new(src, 7, "789", "XYZ")).unwrap();
        buf.stage(PatchSpec::new(src, 0, "01", "AB")).unwrap();
        assert_eq!(buf.commit(), "AB23456XYZ");
    }

    #[test]
    fn go_tokens_requires_clean_parse_when_asked() {
        assert!(go_tokens("package main\n\nfunc f() int { return 1 }\n", true).is_some());
        assert!(go_tokens("this is not go at all {{{", true).is_none());
    }

    #[test]
    fn unique_go_tokens_matches_across_whitespace_changes() {
        let haystack = "package main\n\nfunc f() int {\n\treturn 1\n}\n";
        let old = "func f() int { return 1 }";
        let new = "func f() int { return 2 }";
        let spec = unique_go_tokens(haystack, old, new).unwrap();
        assert!(spec.apply().contains("return 2"));
        assert!(!spec.apply().contains("return 1"));
    }

    // Scenario S6 from the spec: a bare fragment (not a whole Go file), so
    // UniqueGoTokens can't run — the indentation mismatch between haystack
    // (tabs) and needle (4 spaces) is resolved by the whitespace-tolerant
    // strategies instead.
    #[test]
    fn scenario_s6_patch_fuzzy_match() {
        let haystack = "\tif cond {\n\t\tfmt.Println(\"hello\")\n\t}";
        let old = "    if cond {\n        fmt.Println(\"hello\")\n    }";
        let new = "    if cond {\n        fmt.Println(\"modified\")\n    }";

        assert!(go_tokens(haystack, true).is_none());
        let spec = resolve_edit(haystack, old, new).unwrap();
        let result = spec.apply();
        assert!(result.contains("modified"));
        assert!(!result.lines().any(|l| l.contains("hello")));
    }

    #[test]
    fn unique_in_valid_go_rejects_match_overlapping_multiline_string() {
        let haystack = "package main\n\nfunc f() string {\n\treturn `\nline one\nline two\n`\n}\n";
        let old = "line one\nline two";
        let new = "changed";
        let err = unique_in_valid_go(haystack, old, new).unwrap_err();
        assert_eq!(err, PatchError::InvalidRegion);
    }

    #[test]
    fn resolve_edit_reports_no_match_when_nothing_works() {
        let err = resolve_edit("package main\n", "does not exist anywhere", "x").unwrap_err();
        assert_eq!(err, PatchError::NoMatch);
    }
}
