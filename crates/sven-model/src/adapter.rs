// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared retry, max-tokens-escalation and cost-accounting wrapper around a
//! raw provider transport.
//!
//! Each vendor (`anthropic`, `openai_compat`) only implements [`RawTransport`]
//! — one HTTP call, one wire translation. [`RetryingAdapter`] applies the
//! retry ladder, the max-tokens escalation retry and the cost computation
//! exactly once, so that policy cannot drift between vendors.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::content::{Content, Request, Response, StopReason, Usage};
use crate::errors::{ProviderError, TransportError};
use crate::pricing::{self, PriceRates};

const BACKOFF_LADDER: [Duration; 3] =
    [Duration::from_secs(15), Duration::from_secs(30), Duration::from_secs(60)];
const RATE_LIMIT_BASE: Duration = Duration::from_secs(60);

/// One raw attempt at a completion. Implementors own wire translation,
/// cache marking and SSE parsing; they do not retry.
#[async_trait]
pub trait RawTransport: Send + Sync {
    /// Provider id used to key the price table (`"anthropic"`, `"openai"`, …).
    fn provider_id(&self) -> &str;

    /// Send one request. `larger_output` asks the transport to engage its
    /// max-output-tokens beta/flag for the max-tokens escalation retry.
    async fn send_once(&self, req: &Request, larger_output: bool) -> Result<RawResult, TransportError>;
}

/// The outcome of a single raw HTTP call, before retry/escalation/cost policy.
pub struct RawResult {
    pub id: String,
    pub model: String,
    pub content: Vec<Content>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Decorates any [`RawTransport`] with retry, escalation and cost policy.
pub struct RetryingAdapter<T: RawTransport> {
    inner: T,
}

impl<T: RawTransport> RetryingAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Run the full retry ladder for one logical attempt (not counting the
    /// max-tokens escalation retry, which is a separate full attempt).
    async fn send_with_retry(&self, req: &Request, larger_output: bool) -> Result<RawResult, TransportError> {
        let mut attempt: u32 = 0;
        let mut tls_retried = false;
        loop {
            match self.inner.send_once(req, larger_output).await {
                Ok(r) => return Ok(r),
                Err(e) if e.is_fatal_client_error() => return Err(e),
                Err(e) if e.is_rate_limited() => {
                    let sleep_for = RATE_LIMIT_BASE + backoff_step(attempt) + jitter();
                    warn!(attempt, sleep_secs = sleep_for.as_secs(), "rate limited, backing off");
                    tokio::time::sleep(sleep_for).await;
                    attempt += 1;
                }
                Err(e) if e.is_server_error() => {
                    let sleep_for = backoff_step(attempt) + jitter();
                    warn!(attempt, sleep_secs = sleep_for.as_secs(), "server error, retrying");
                    tokio::time::sleep(sleep_for).await;
                    attempt += 1;
                }
                Err(TransportError::TlsTransient(msg)) if !tls_retried => {
                    tls_retried = true;
                    warn!(%msg, "tls transient fault, retrying once without delay");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `Do(request) -> response`, applying retry, max-tokens escalation and
    /// cost computation.
    pub async fn do_request(&self, req: Request) -> Result<Response, ProviderError> {
        let first = self.send_with_retry(&req, false).await?;

        let (result, usage) = if first.stop_reason == StopReason::MaxTokens {
            debug!("stop_reason=max_tokens, escalating with larger output beta");
            let second = self.send_with_retry(&req, true).await?;
            let mut combined_usage = first.usage;
            combined_usage.add(&second.usage);
            (second, combined_usage)
        } else {
            let usage = first.usage;
            (first, usage)
        };

        let rates = self.rates_for(&req.model)?;
        let cost_usd = pricing::cost_usd(&usage, &rates);

        Ok(Response {
            id: result.id,
            model: result.model,
            content: result.content,
            stop_reason: result.stop_reason,
            usage,
            cost_usd,
        })
    }

    fn rates_for(&self, model: &str) -> Result<PriceRates, ProviderError> {
        pricing::lookup_rates(self.inner.provider_id(), model).ok_or_else(|| ProviderError::UnknownModelPricing {
            provider: self.inner.provider_id().to_string(),
            model: model.to_string(),
        })
    }
}

fn backoff_step(attempt: u32) -> Duration {
    BACKOFF_LADDER[(attempt as usize).min(BACKOFF_LADDER.len() - 1)]
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        calls: AtomicU32,
        fail_times: u32,
        error_kind: fn() -> TransportError,
    }

    #[async_trait]
    impl RawTransport for FlakyTransport {
        fn provider_id(&self) -> &str {
            "mock"
        }

        async fn send_once(&self, _req: &Request, larger_output: bool) -> Result<RawResult, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err((self.error_kind)());
            }
            Ok(RawResult {
                id: "r1".into(),
                model: "mock-model".into(),
                content: vec![Content::text("ok")],
                stop_reason: if larger_output { StopReason::EndTurn } else { StopReason::EndTurn },
                usage: Usage { input_tokens: 1, output_tokens: 1, cache_read_tokens: 0, cache_creation_tokens: 0 },
            })
        }
    }

    fn req() -> Request {
        Request { model: "mock".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn fatal_client_error_fails_fast() {
        let t = FlakyTransport {
            calls: AtomicU32::new(0),
            fail_times: 99,
            error_kind: || TransportError::Http { status: 400, body: "bad".into() },
        };
        let adapter = RetryingAdapter::new(t);
        let err = adapter.do_request(req()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Fatal(_)));
        assert_eq!(adapter.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let t = FlakyTransport {
            calls: AtomicU32::new(0),
            fail_times: 1,
            error_kind: || TransportError::Http { status: 503, body: "oops".into() },
        };
        let adapter = RetryingAdapter::new(t);
        let resp = adapter.do_request(req()).await.unwrap();
        assert_eq!(resp.cost_usd, 0.0);
        assert_eq!(adapter.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_model_is_fatal_pricing_error() {
        struct UnknownModelTransport;
        #[async_trait]
        impl RawTransport for UnknownModelTransport {
            fn provider_id(&self) -> &str {
                "anthropic"
            }
            async fn send_once(&self, _req: &Request, _larger: bool) -> Result<RawResult, TransportError> {
                Ok(RawResult {
                    id: "r".into(),
                    model: "totally-unknown".into(),
                    content: vec![],
                    stop_reason: StopReason::EndTurn,
                    usage: Usage::default(),
                })
            }
        }
        let adapter = RetryingAdapter::new(UnknownModelTransport);
        let err = adapter
            .do_request(Request { model: "totally-unknown".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownModelPricing { .. }));
    }
}
