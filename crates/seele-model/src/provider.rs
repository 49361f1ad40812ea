// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Capability, Message, ToolCallRequest};

pub type StepStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// One completion request.  `messages[0]` is the system message.
#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A thinking/reasoning delta from the model
    ThinkDelta(String),
    /// A tool-call delta.  Providers interleave chunks for parallel calls by
    /// `index`; `id`/`name` arrive once, `arguments` accumulates across deltas.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics
    Usage(Usage),
    /// The stream finished normally
    Done,
}

/// Token usage from one step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// The folded outcome of one streamed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The complete assistant message (text + think parts + tool_calls).
    pub message: Message,
    /// Tool calls in provider order, mirrored from `message.tool_calls`.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

/// Typed failures from a model transport.
///
/// `Transient` failures are retry-eligible; everything else aborts the turn.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("request schema mismatch: {0}")]
    Schema(String),
    #[error("step cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status into the error taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(format!("HTTP {status}: {body}")),
            400 | 404 | 422 => ProviderError::Schema(format!("HTTP {status}: {body}")),
            408 | 429 => ProviderError::Transient(format!("HTTP {status}: {body}")),
            s if s >= 500 => ProviderError::Transient(format!("HTTP {status}: {body}")),
            _ => ProviderError::Schema(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Driver name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Features this provider/model combination supports.
    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::new()
    }

    /// Send one completion request and return the streaming response.
    ///
    /// The caller folds the stream into a [`StepResult`]; dropping the stream
    /// aborts the in-flight request.
    async fn step(&self, req: StepRequest) -> Result<StepStream, ProviderError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
