// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Compile-time price table and cost computation.
//!
//! Rates are cents per million tokens. Token counts are accumulated as
//! integers and divided exactly once, at the very end, so that rounding
//! error cannot creep in across a long session of many small additions.

use crate::content::Usage;

/// Price of one model, in cents per million tokens of each kind.
#[derive(Debug, Clone, Copy)]
pub struct PriceRates {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

struct PriceEntry {
    provider: &'static str,
    model: &'static str,
    rates: PriceRates,
}

/// Static price table. Extend as new models are announced.
///
/// `model` matches are by prefix so that dated model snapshots
/// (`claude-opus-4-5-20260115`) resolve to their family's price.
static PRICE_TABLE: &[PriceEntry] = &[
    PriceEntry {
        provider: "anthropic",
        model: "claude-opus",
        rates: PriceRates { input: 1500, output: 7500, cache_read: 150, cache_creation: 1875 },
    },
    PriceEntry {
        provider: "anthropic",
        model: "claude-sonnet",
        rates: PriceRates { input: 300, output: 1500, cache_read: 30, cache_creation: 375 },
    },
    PriceEntry {
        provider: "anthropic",
        model: "claude-haiku",
        rates: PriceRates { input: 80, output: 400, cache_read: 8, cache_creation: 100 },
    },
    PriceEntry {
        provider: "openai",
        model: "gpt-4o-mini",
        rates: PriceRates { input: 15, output: 60, cache_read: 8, cache_creation: 0 },
    },
    PriceEntry {
        provider: "openai",
        model: "gpt-4o",
        rates: PriceRates { input: 250, output: 1000, cache_read: 125, cache_creation: 0 },
    },
    PriceEntry {
        provider: "openai",
        model: "o1",
        rates: PriceRates { input: 1500, output: 6000, cache_read: 750, cache_creation: 0 },
    },
    PriceEntry {
        provider: "mock",
        model: "mock",
        rates: PriceRates { input: 0, output: 0, cache_read: 0, cache_creation: 0 },
    },
];

/// Look up the price rates for `provider`/`model`. Returns `None` for an
/// unrecognized model — callers must treat that as a fatal configuration
/// error, never silently charge nothing.
pub fn lookup_rates(provider: &str, model: &str) -> Option<PriceRates> {
    PRICE_TABLE
        .iter()
        .find(|e| e.provider == provider && model.starts_with(e.model))
        .map(|e| e.rates)
}

/// Compute the USD cost of `usage` at `rates`.
///
/// All multiplication happens in integer cents-of-a-million-tokens space;
/// the division to dollars happens exactly once.
pub fn cost_usd(usage: &Usage, rates: &PriceRates) -> f64 {
    let total_cents_per_million: u128 = usage.input_tokens as u128 * rates.input as u128
        + usage.output_tokens as u128 * rates.output as u128
        + usage.cache_read_tokens as u128 * rates.cache_read as u128
        + usage.cache_creation_tokens as u128 * rates.cache_creation as u128;
    (total_cents_per_million as f64) / 1_000_000.0 / 100.0
}
