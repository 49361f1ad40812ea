// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub soul: SoulConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Directory holding per-session logs.  Overridden by the
    /// SEELE_SESSIONS_DIR environment variable; defaults to the platform
    /// data dir (`~/.local/share/seele/sessions` on Linux).
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "openrouter" | "groq" | "local" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local servers (llama.cpp, Ollama) and
    /// OpenAI-compatible proxies.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context window size in tokens.  The compaction threshold is a
    /// fraction of this value.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulConfig {
    /// Maximum model calls in one user turn before the loop gives up.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Maximum retries for a transient provider failure within one step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fraction of the context window at which compaction triggers.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

impl Default for SoulConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Wall-clock timeout for one shell command, in seconds.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Auto-approve every tool call without asking.  Dangerous; also
    /// settable per run with `--yolo`.
    #[serde(default)]
    pub yolo: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            yolo: false,
        }
    }
}

fn default_context_window() -> usize {
    128_000
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_compaction_threshold() -> f32 {
    0.8
}

fn default_shell_timeout() -> u64 {
    120
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
