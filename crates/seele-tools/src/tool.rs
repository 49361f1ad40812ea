// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use seele_model::{ContentPart, Message};

/// A single tool invocation requested by the model, with parsed arguments.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub args: Value,
}

/// Successful tool output: plain text or structured content parts.
///
/// Most tools produce `Text`.  Tools that return images produce `Parts`
/// mixing text and image parts; these are carried verbatim into the
/// tool-role message.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments failed schema validation; the tool was never invoked.
    Validation,
    /// The tool ran and failed.
    Runtime,
    /// The user denied the call; the tool was never invoked.
    Denied,
    /// The tool exceeded its wall-clock bound.
    Timeout,
}

/// A non-fatal tool failure.  Surfaces as a tool-role message so the model
/// can react; never aborts the turn.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Partial output produced before the failure, if any.
    pub output: Option<String>,
    /// Set when the failure was an unexpected crash (panic) rather than a
    /// failure path the tool itself reported.
    pub unexpected: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            output: None,
            unexpected: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Runtime, message)
    }

    pub fn denied() -> Self {
        Self::new(ToolErrorKind::Denied, "user denied")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Mark this error as an unexpected crash.
    pub fn unexpected(mut self) -> Self {
        self.unexpected = true;
        self
    }
}

/// The outcome of dispatching one tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The `ToolCall.id` this result answers.
    pub id: String,
    pub outcome: Result<ToolOutput, ToolError>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            id: id.into(),
            outcome: Ok(output),
        }
    }

    pub fn err(id: impl Into<String>, err: ToolError) -> Self {
        Self {
            id: id.into(),
            outcome: Err(err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// One-line rendering for UI display.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Ok(ToolOutput::Text(t)) => t.lines().next().unwrap_or("").to_string(),
            Ok(ToolOutput::Parts(parts)) => format!("{} content parts", parts.len()),
            Err(e) => format!("error: {}", e.message),
        }
    }
}

const EMPTY_OUTPUT_NOTICE: &str = "Tool output is empty.";
const UNEXPECTED_SUFFIX: &str =
    " (This was an unexpected runtime error, not a failure reported by the tool.)";

/// Convert a [`ToolResult`] into the tool-role message appended to history.
pub fn tool_result_to_message(tr: &ToolResult) -> Message {
    let content = match &tr.outcome {
        Ok(ToolOutput::Text(t)) => {
            let text = if t.is_empty() {
                EMPTY_OUTPUT_NOTICE.to_string()
            } else {
                t.clone()
            };
            vec![ContentPart::text(text)]
        }
        Ok(ToolOutput::Parts(parts)) => parts.clone(),
        Err(e) => {
            let mut text = format!("ERROR: {}", e.message);
            if e.unexpected {
                text.push_str(UNEXPECTED_SUFFIX);
            }
            if let Some(out) = &e.output {
                text.push('\n');
                text.push_str(out);
            }
            vec![ContentPart::text(text)]
        }
    };
    Message::tool(tr.id.clone(), content)
}

// ─── Approval ─────────────────────────────────────────────────────────────────

/// The user's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AllowOnce,
    AllowAlways,
    Deny,
}

/// The approval wait was cancelled before the user answered.
#[derive(Debug, Clone, Copy, Error)]
#[error("approval wait aborted")]
pub struct ApprovalWaitAborted;

/// Gate consulted before a dangerous tool runs.  Implemented by the Soul's
/// approval subsystem; tools and the registry only see this trait.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Result<Decision, ApprovalWaitAborted>;
}

// ─── Tool events ──────────────────────────────────────────────────────────────

/// A structured todo item managed by the set_todo_list tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    /// One of: "pending", "in_progress", "completed"
    pub status: String,
}

/// Events emitted by running tools, drained by the agent loop and forwarded
/// to the UI.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// Incremental progress text for a long-running call.
    Progress { call_id: String, text: String },
    /// The todo list was replaced.
    TodoUpdate(Vec<TodoItem>),
}

/// Everything a tool can reach during one invocation.
#[derive(Clone)]
pub struct ToolCtx {
    pub cwd: PathBuf,
    pub session_id: String,
    pub approval: Arc<dyn ApprovalGate>,
    pub cancel: CancellationToken,
    events: mpsc::UnboundedSender<ToolEvent>,
}

impl ToolCtx {
    pub fn new(
        cwd: PathBuf,
        session_id: String,
        approval: Arc<dyn ApprovalGate>,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<ToolEvent>,
    ) -> Self {
        Self {
            cwd,
            session_id,
            approval,
            cancel,
            events,
        }
    }

    /// Emit a progress line for `call_id`.  Never blocks.
    pub fn progress(&self, call_id: &str, text: impl Into<String>) {
        let _ = self.events.send(ToolEvent::Progress {
            call_id: call_id.to_string(),
            text: text.into(),
        });
    }

    pub fn emit(&self, event: ToolEvent) {
        let _ = self.events.send(event);
    }
}

// ─── Tool trait ───────────────────────────────────────────────────────────────

/// Trait that every builtin and registered tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object
    fn parameters_schema(&self) -> Value;
    /// Dangerous tools require user approval before each invocation.
    /// This is a static property of the tool, not of its arguments.
    fn dangerous(&self) -> bool {
        false
    }
    /// Per-invocation wall-clock bound.  `None` means unbounded.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Execute the tool.  Failure paths return a [`ToolError`]; the loop
    /// converts either outcome into a tool-role message.
    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_text(id: &str, text: &str) -> ToolResult {
        ToolResult::ok(id, ToolOutput::Text(text.into()))
    }

    #[test]
    fn ok_output_becomes_tool_message() {
        let m = tool_result_to_message(&ok_text("c1", "listing"));
        assert_eq!(m.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(m.as_text(), Some("listing"));
    }

    #[test]
    fn empty_output_substitutes_notice() {
        let m = tool_result_to_message(&ok_text("c1", ""));
        assert_eq!(m.as_text(), Some(EMPTY_OUTPUT_NOTICE));
    }

    #[test]
    fn parts_output_carried_verbatim() {
        let parts = vec![
            ContentPart::text("chart"),
            ContentPart::image("data:image/png;base64,A"),
        ];
        let tr = ToolResult::ok("c1", ToolOutput::Parts(parts.clone()));
        let m = tool_result_to_message(&tr);
        assert_eq!(m.content, parts);
    }

    #[test]
    fn error_gets_prefix() {
        let tr = ToolResult::err("c1", ToolError::runtime("disk full"));
        let m = tool_result_to_message(&tr);
        assert_eq!(m.as_text(), Some("ERROR: disk full"));
    }

    #[test]
    fn unexpected_error_gets_suffix_and_output() {
        let tr = ToolResult::err(
            "c1",
            ToolError::runtime("panic").unexpected().with_output("partial"),
        );
        let m = tool_result_to_message(&tr);
        let text = m.as_text().unwrap();
        assert!(text.starts_with("ERROR: panic"));
        assert!(text.contains(UNEXPECTED_SUFFIX.trim_start()));
        assert!(text.ends_with("partial"));
    }

    #[test]
    fn denied_error_has_fixed_message() {
        let e = ToolError::denied();
        assert_eq!(e.kind, ToolErrorKind::Denied);
        assert_eq!(e.message, "user denied");
    }

    #[test]
    fn summary_takes_first_line() {
        let tr = ok_text("c1", "a.txt\nb.txt");
        assert_eq!(tr.summary(), "a.txt");
    }

    #[test]
    fn summary_reports_errors() {
        let tr = ToolResult::err("c1", ToolError::validation("bad args"));
        assert!(tr.summary().contains("bad args"));
    }
}
