// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Error taxonomy for the provider adapter boundary.

use thiserror::Error;

/// A transport-level failure, before retry policy is applied.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("tls transient fault: {0}")]
    TlsTransient(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Error surfaced from [`crate::adapter::ProviderAdapter::do_request`] after
/// retry policy has been exhausted.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned a fatal error: {0}")]
    Fatal(#[from] TransportError),
    #[error("unknown model for pricing: {provider}/{model}")]
    UnknownModelPricing { provider: String, model: String },
    #[error("request canceled")]
    Canceled,
}

impl TransportError {
    /// HTTP 5xx — retry with the bounded backoff ladder.
    pub fn is_server_error(&self) -> bool {
        matches!(self, TransportError::Http { status, .. } if (500..600).contains(status))
    }

    /// HTTP 429 — retry with the 429 backoff ladder.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::Http { status, .. } if *status == 429)
    }

    /// Any other 4xx — fail fast.
    pub fn is_fatal_client_error(&self) -> bool {
        matches!(self, TransportError::Http { status, .. } if (400..500).contains(status) && *status != 429)
    }
}
