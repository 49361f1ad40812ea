// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::{StepRequest, StepStream, StreamEvent, Usage},
    Capability, ProviderError, Role,
};

/// Deterministic mock provider for tests and `--model mock`.  Echoes the
/// last user message back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn step(&self, req: StepRequest) -> Result<StepStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.extract_text(" "))
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<Result<StreamEvent, ProviderError>> = vec![
            Ok(StreamEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(StreamEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
            })),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted `step` outcome: either an event sequence or an upfront error.
pub type Script = Result<Vec<StreamEvent>, ProviderError>;

/// A pre-scripted provider.  Each call to `step` pops the next script from
/// the front of the queue, so tests can specify exact event sequences —
/// including tool calls and typed failures — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    capabilities: HashSet<Capability>,
    /// The last [`StepRequest`] seen by this provider.  Written on each
    /// `step` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<StepRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            capabilities: HashSet::new(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Declare extra capabilities (e.g. image input) for multimodal tests.
    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(text_script(reply))])
    }

    /// Convenience: provider that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(tool_call_script(tool_id, tool_name, args_json)),
            Ok(text_script(final_text)),
        ])
    }
}

/// Build the event sequence for a plain text reply.
pub fn text_script(reply: impl Into<String>) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TextDelta(reply.into()),
        StreamEvent::Usage(Usage {
            input_tokens: 5,
            output_tokens: 5,
        }),
        StreamEvent::Done,
    ]
}

/// Build the event sequence for a single tool call.
pub fn tool_call_script(
    tool_id: impl Into<String>,
    tool_name: impl Into<String>,
    args_json: impl Into<String>,
) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCall {
            index: 0,
            id: tool_id.into(),
            name: tool_name.into(),
            arguments: args_json.into(),
        },
        StreamEvent::Done,
    ]
}

#[async_trait]
impl crate::ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn step(&self, req: StepRequest) -> Result<StepStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Ok(vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::Done,
                ])
            } else {
                scripts.remove(0)
            }
        };
        let events = script?;
        let wrapped: Vec<Result<StreamEvent, ProviderError>> =
            events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
