// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Constructs a [`ContentProvider`] — the adapter-boundary trait the
//! conversation engine calls — from configuration.
//!
//! This is the `content`/`adapter` analogue of [`crate::from_config`]: same
//! provider-id dispatch, but it builds a [`crate::adapter::RetryingAdapter`]
//! around a [`crate::adapter::RawTransport`] instead of the older streaming
//! [`crate::ModelProvider`].

use async_trait::async_trait;
use sven_config::ModelConfig;

use crate::adapter::{RawTransport, RetryingAdapter};
use crate::anthropic_transport::AnthropicTransport;
use crate::content::{Content, Request, Response, Role, StopReason, Usage};
use crate::errors::ProviderError;
use crate::openai_transport::{AuthStyle, OpenAiTransport};
use crate::registry;

/// The single operation the conversation engine needs from a provider:
/// `Do(request) -> response | error`.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn do_request(&self, req: Request) -> Result<Response, ProviderError>;
}

#[async_trait]
impl<T: RawTransport> ContentProvider for RetryingAdapter<T> {
    async fn do_request(&self, req: Request) -> Result<Response, ProviderError> {
        RetryingAdapter::do_request(self, req).await
    }
}

/// Echoes the last user message's text, prefixed, at zero cost. Used by
/// `provider = "mock"` and by tests that want a conversation engine without
/// network access.
pub struct MockContentProvider;

#[async_trait]
impl ContentProvider for MockContentProvider {
    async fn do_request(&self, req: Request) -> Result<Response, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or_default();
        Ok(Response {
            id: "mock-response".into(),
            model: req.model,
            content: vec![Content::text(format!("MOCK: {reply}"))],
            stop_reason: StopReason::EndTurn,
            usage: Usage { input_tokens: 10, output_tokens: 10, cache_read_tokens: 0, cache_creation_tokens: 0 },
            cost_usd: 0.0,
        })
    }
}

/// Build a boxed [`ContentProvider`] from configuration, selecting the
/// adapter implementation by `cfg.provider` the same way [`crate::from_config`]
/// selects a [`crate::ModelProvider`].
pub fn content_provider_from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ContentProvider>> {
    if cfg.provider == "mock" {
        return Ok(Box::new(MockContentProvider));
    }

    if cfg.provider == "anthropic" {
        let key = crate::resolve_api_key(cfg)
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;
        let transport = AnthropicTransport::new(
            key,
            cfg.base_url.clone(),
            cfg.cache_system_prompt,
            cfg.extended_cache_time,
            cfg.cache_tools,
            cfg.cache_conversation,
            cfg.cache_images,
            cfg.cache_tool_results,
        );
        return Ok(Box::new(RetryingAdapter::new(transport)));
    }

    // Azure: special-cased URL shape and api-key-header auth, same as the
    // streaming path in `from_config`.
    if cfg.provider == "azure" {
        let chat_url = if let Some(b) = &cfg.base_url {
            let api_ver = cfg.azure_api_version.as_deref().unwrap_or("2024-02-01");
            format!("{}/chat/completions?api-version={}", b.trim_end_matches('/'), api_ver)
        } else {
            let resource = cfg.azure_resource.as_deref().unwrap_or("myresource");
            let deployment = cfg.azure_deployment.as_deref().unwrap_or(&cfg.name);
            let api_ver = cfg.azure_api_version.as_deref().unwrap_or("2024-02-01");
            format!(
                "https://{resource}.openai.azure.com/openai/deployments/{deployment}/chat/completions?api-version={api_ver}"
            )
        };
        let key = crate::resolve_api_key(cfg).ok_or_else(|| anyhow::anyhow!("azure API key not set"))?;
        let transport = OpenAiTransport::new("azure", chat_url, Some(key), AuthStyle::ApiKeyHeader, vec![], serde_json::json!({}), false);
        return Ok(Box::new(RetryingAdapter::new(transport)));
    }

    // Every other registered driver id speaks the OpenAI-compatible wire
    // format; the registry's static metadata supplies the default base URL
    // and API-key-env, so one code path covers every gateway.
    let meta = registry::get_driver(&cfg.provider)
        .ok_or_else(|| anyhow::anyhow!("unknown provider id: {}", cfg.provider))?;
    let base_url = cfg
        .base_url
        .clone()
        .or_else(|| meta.default_base_url.map(str::to_string))
        .ok_or_else(|| anyhow::anyhow!("provider '{}' requires base_url in config", cfg.provider))?;
    let chat_url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let key = crate::resolve_api_key(cfg);
    let auth_style = if meta.requires_api_key { AuthStyle::Bearer } else { AuthStyle::None };
    let reasoning_model = cfg.provider == "openai"
        && (cfg.name.starts_with("o1-") || cfg.name.starts_with("o3-") || cfg.name.starts_with("gpt-5"));

    let transport = OpenAiTransport::new(cfg.provider.clone(), chat_url, key, auth_style, vec![], serde_json::json!({}), reasoning_model);
    Ok(Box::new(RetryingAdapter::new(transport)))
}
