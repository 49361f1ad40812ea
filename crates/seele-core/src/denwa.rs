// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use seele_tools::{Tool, ToolCall, ToolCtx, ToolError, ToolOutput};

/// A message sent backwards to an earlier checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DMail {
    pub checkpoint_id: usize,
    pub message: String,
}

/// Single-slot D-Mail mailbox.
///
/// No queueing: if two D-Mails are sent within one step the later one wins,
/// since the earlier would be dropped by the impending revert anyway.  The
/// Soul publishes the current checkpoint count before every step so the
/// send tool can reject out-of-range targets.
#[derive(Debug, Default)]
pub struct DenwaRenji {
    pending: Mutex<Option<DMail>>,
    n_checkpoints: AtomicUsize,
}

impl DenwaRenji {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `dmail`, overwriting any prior pending value.
    pub fn send(&self, dmail: DMail) {
        *self.pending.lock().unwrap() = Some(dmail);
    }

    /// Atomically take and clear the pending slot.
    pub fn fetch_pending(&self) -> Option<DMail> {
        self.pending.lock().unwrap().take()
    }

    pub fn set_n_checkpoints(&self, n: usize) {
        self.n_checkpoints.store(n, Ordering::Relaxed);
    }

    pub fn n_checkpoints(&self) -> usize {
        self.n_checkpoints.load(Ordering::Relaxed)
    }
}

/// Model-facing tool that drops a D-Mail into the mailbox.
///
/// On success it still returns a [`ToolError`]: the revert happens before
/// the model could ever read a success result, so nothing useful can be
/// said to the doomed timeline.
pub struct SendDmailTool {
    denwa: Arc<DenwaRenji>,
}

impl SendDmailTool {
    pub fn new(denwa: Arc<DenwaRenji>) -> Self {
        Self { denwa }
    }
}

#[derive(Deserialize)]
struct SendDmailParams {
    checkpoint_id: usize,
    message: String,
}

#[async_trait]
impl Tool for SendDmailTool {
    fn name(&self) -> &str {
        "send_dmail"
    }

    fn description(&self) -> &str {
        "Send a short message (a D-Mail) to yourself at an earlier checkpoint. \
         The conversation rolls back to that checkpoint and continues with your \
         message injected, as if the steps in between never happened. Use it \
         when you realise an earlier approach was wrong and want to redo it \
         with what you know now. checkpoint_id counts from 0; one checkpoint \
         is recorded before every step."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "checkpoint_id": {
                    "type": "integer",
                    "description": "Checkpoint to return to (0-based)"
                },
                "message": {
                    "type": "string",
                    "description": "What your past self needs to know"
                }
            },
            "required": ["checkpoint_id", "message"]
        })
    }

    async fn invoke(&self, call: &ToolCall, _ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: SendDmailParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;

        let available = self.denwa.n_checkpoints();
        if params.checkpoint_id >= available {
            return Err(ToolError::validation(format!(
                "checkpoint_id {} is out of range: only {} checkpoints recorded",
                params.checkpoint_id, available
            )));
        }

        debug!(checkpoint = params.checkpoint_id, "D-Mail queued");
        self.denwa.send(DMail {
            checkpoint_id: params.checkpoint_id,
            message: params.message,
        });
        Err(ToolError::runtime(
            "D-Mail sent; this timeline is being abandoned",
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use seele_tools::{ApprovalGate, ApprovalWaitAborted, Decision, ToolEvent};

    use super::*;

    struct AllowAll;

    #[async_trait]
    impl ApprovalGate for AllowAll {
        async fn request(&self, _: &str, _: &Value) -> Result<Decision, ApprovalWaitAborted> {
            Ok(Decision::AllowOnce)
        }
    }

    fn ctx() -> ToolCtx {
        let (tx, _rx) = mpsc::unbounded_channel::<ToolEvent>();
        ToolCtx::new(
            PathBuf::from("."),
            "s".into(),
            std::sync::Arc::new(AllowAll),
            CancellationToken::new(),
            tx,
        )
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "send_dmail".into(),
            args,
        }
    }

    #[test]
    fn send_overwrites_pending() {
        let d = DenwaRenji::new();
        d.send(DMail { checkpoint_id: 0, message: "first".into() });
        d.send(DMail { checkpoint_id: 1, message: "second".into() });
        let got = d.fetch_pending().unwrap();
        assert_eq!(got.message, "second");
    }

    #[test]
    fn fetch_clears_the_slot() {
        let d = DenwaRenji::new();
        d.send(DMail { checkpoint_id: 0, message: "m".into() });
        assert!(d.fetch_pending().is_some());
        assert!(d.fetch_pending().is_none());
    }

    #[tokio::test]
    async fn tool_stores_dmail_and_returns_synthetic_error() {
        let denwa = Arc::new(DenwaRenji::new());
        denwa.set_n_checkpoints(2);
        let tool = SendDmailTool::new(Arc::clone(&denwa));

        let out = tool
            .invoke(&call(json!({"checkpoint_id": 1, "message": "use head -n 100"})), &ctx())
            .await;
        assert!(out.is_err(), "model must never observe success");
        let pending = denwa.fetch_pending().unwrap();
        assert_eq!(pending.checkpoint_id, 1);
        assert_eq!(pending.message, "use head -n 100");
    }

    #[tokio::test]
    async fn out_of_range_checkpoint_is_dropped() {
        let denwa = Arc::new(DenwaRenji::new());
        denwa.set_n_checkpoints(2);
        let tool = SendDmailTool::new(Arc::clone(&denwa));

        let err = tool
            .invoke(&call(json!({"checkpoint_id": 2, "message": "x"})), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, seele_tools::ToolErrorKind::Validation);
        assert!(denwa.fetch_pending().is_none(), "no D-Mail stored, no revert");
    }

    #[test]
    fn send_dmail_is_not_dangerous() {
        let tool = SendDmailTool::new(Arc::new(DenwaRenji::new()));
        assert!(!tool.dangerous());
    }
}
