// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod message;
mod mock;
pub(crate) mod openai_compat;
mod provider;

pub use message::{check_message, Capability, ContentPart, Message, Role, ToolCallRequest};
pub use mock::{text_script, tool_call_script, MockProvider, Script, ScriptedProvider};
pub use provider::{
    ChatProvider, ProviderError, StepRequest, StepResult, StepStream, StreamEvent, ToolSpec, Usage,
};

use std::sync::Arc;

use anyhow::bail;
use seele_config::ModelConfig;

use openai_compat::OpenAiCompatProvider;

/// Construct a shared [`ChatProvider`] from configuration.
///
/// Selects the driver implementation based on `cfg.provider`.  Every hosted
/// driver speaks the OpenAI-compatible `/chat/completions` SSE wire format;
/// they differ only in base URL and credential resolution.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    match cfg.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        "openai" => Ok(Arc::new(OpenAiCompatProvider::new(
            "openai",
            cfg.name.clone(),
            resolve_api_key(cfg, "OPENAI_API_KEY"),
            &base_url(cfg, "https://api.openai.com/v1"),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "openrouter" => Ok(Arc::new(OpenAiCompatProvider::new(
            "openrouter",
            cfg.name.clone(),
            resolve_api_key(cfg, "OPENROUTER_API_KEY"),
            &base_url(cfg, "https://openrouter.ai/api/v1"),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "groq" => Ok(Arc::new(OpenAiCompatProvider::new(
            "groq",
            cfg.name.clone(),
            resolve_api_key(cfg, "GROQ_API_KEY"),
            &base_url(cfg, "https://api.groq.com/openai/v1"),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        // Local OpenAI-compatible servers (llama.cpp, Ollama, vLLM) — no key.
        "local" => {
            let Some(base) = cfg.base_url.as_deref() else {
                bail!("the \"local\" provider requires base_url in config");
            };
            Ok(Arc::new(OpenAiCompatProvider::new(
                "local",
                cfg.name.clone(),
                None,
                base,
                cfg.max_tokens,
                cfg.temperature,
            )))
        }
        other => bail!(
            "unknown model provider \"{other}\"; \
             expected one of: openai, openrouter, groq, local, mock"
        ),
    }
}

/// Resolve the API key: explicit config value, then the configured env var,
/// then the driver's conventional env var.
fn resolve_api_key(cfg: &ModelConfig, default_env: &str) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        if let Ok(k) = std::env::var(var) {
            return Some(k);
        }
    }
    std::env::var(default_env).ok()
}

fn base_url(cfg: &ModelConfig, default: &str) -> String {
    cfg.base_url.clone().unwrap_or_else(|| default.into())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
