// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Experiment flags & Skribe attributes (C10).
//!
//! A process-wide, read-mostly registry of named feature flags. Call
//! [`register`] once per flag at startup (idempotent), then [`enable_from`]
//! with the config/env comma-separated value, then [`is_enabled`] at any
//! call site that branches on the flag.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Meta-flag that turns on every registered experiment except itself and
/// `"list"`.
pub const ALL: &str = "all";

struct Registry {
    descriptions: std::collections::HashMap<String, String>,
    enabled: HashSet<String>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry { descriptions: std::collections::HashMap::new(), enabled: HashSet::new() })
    })
}

/// Declare a flag and its description. Safe to call multiple times with the
/// same name; later descriptions overwrite earlier ones.
pub fn register(name: &str, description: &str) {
    let mut r = registry().lock().unwrap();
    r.descriptions.insert(name.to_string(), description.to_string());
}

/// Parse a comma-separated flag value (from config and/or the
/// `SVEN_EXPERIMENTS` environment variable, unioned) and enable every named
/// flag. `all` enables every registered flag except `all` and `list`.
pub fn enable_from(value: &str) {
    let names: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut r = registry().lock().unwrap();
    if names.iter().any(|n| n == ALL) {
        let all_known: Vec<String> = r
            .descriptions
            .keys()
            .filter(|k| k.as_str() != ALL && k.as_str() != "list")
            .cloned()
            .collect();
        r.enabled.extend(all_known);
    }
    for name in names {
        if name != ALL {
            r.enabled.insert(name);
        }
    }
}

/// Whether `name` is currently enabled.
pub fn is_enabled(name: &str) -> bool {
    registry().lock().unwrap().enabled.contains(name)
}

/// List every registered flag and whether it is currently enabled, sorted
/// by name — backs a `--experiments list` style CLI surface.
pub fn list() -> Vec<(String, String, bool)> {
    let r = registry().lock().unwrap();
    let mut out: Vec<(String, String, bool)> = r
        .descriptions
        .iter()
        .map(|(name, desc)| (name.clone(), desc.clone(), r.enabled.contains(name)))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Enters a `tracing` span carrying the Skribe context attributes
/// (`convo_id`, `parent_convo_id`) for the duration of one turn. Every event
/// emitted while the returned guard is alive is automatically tagged.
pub fn convo_span(convo_id: &str, parent_convo_id: Option<&str>) -> tracing::Span {
    tracing::info_span!("conversation_turn", convo_id = %convo_id, parent_convo_id = parent_convo_id.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Flag names are process-global; give the test module its own
    // namespace so parallel test runs in this crate don't collide.
    fn setup() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            register("exp_test_one", "first test flag");
            register("exp_test_two", "second test flag");
        });
    }

    #[test]
    fn enable_from_comma_separated_list() {
        setup();
        enable_from("exp_test_one");
        assert!(is_enabled("exp_test_one"));
    }

    #[test]
    fn unknown_flag_enabled_but_never_registered_is_still_tracked() {
        enable_from("exp_never_registered");
        assert!(is_enabled("exp_never_registered"));
    }

    #[test]
    fn all_enables_every_registered_flag_except_list_and_all() {
        setup();
        enable_from(ALL);
        assert!(is_enabled("exp_test_one"));
        assert!(is_enabled("exp_test_two"));
        assert!(!is_enabled("list"));
    }
}
