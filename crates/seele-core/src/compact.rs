// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use seele_model::{ContentPart, Message, Role};

// ─── Compaction prompt ────────────────────────────────────────────────────────

pub const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Build the message list for the summarizer call: a dedicated system prompt
/// plus the serialised history as a single user message.
pub fn summary_request(history: &[Message]) -> Vec<Message> {
    vec![
        Message::system(SUMMARIZE_PROMPT),
        Message::user(serialize_history(history)),
    ]
}

/// Index where the preserved tail starts: the last user message, widened
/// until every tool-role message in the tail has its parent assistant
/// message in the tail too.  A compacted history with orphaned tool results
/// would be rejected by provider APIs on the next request.
pub fn tail_start(history: &[Message]) -> usize {
    let Some(mut idx) = history.iter().rposition(|m| m.role == Role::User) else {
        return history.len();
    };
    loop {
        let tail = &history[idx..];
        let orphan = tail.iter().find_map(|m| {
            if m.role != Role::Tool {
                return None;
            }
            let call_id = m.tool_call_id.as_deref()?;
            let paired = tail
                .iter()
                .any(|a| a.tool_calls.iter().any(|tc| tc.id == call_id));
            (!paired).then(|| call_id.to_string())
        });
        let Some(call_id) = orphan else {
            return idx;
        };
        match history[..idx]
            .iter()
            .rposition(|a| a.tool_calls.iter().any(|tc| tc.id == call_id))
        {
            Some(parent) => idx = parent,
            None => return idx,
        }
    }
}

/// Serialise a message list into plain text for the compaction prompt.
pub fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let mut text = m
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::ImageUrl { .. } => Some("[image]".to_string()),
                    ContentPart::Think { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            for tc in &m.tool_calls {
                text.push_str(&format!(" [tool_call: {}({})]", tc.name, tc.arguments));
            }
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
