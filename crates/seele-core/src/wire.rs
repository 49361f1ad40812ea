// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The typed channel between the Soul and a UI.
//!
//! Two independent FIFO directions over unbounded queues: enqueueing never
//! blocks, so the Soul's streaming path can never be stalled by a slow UI.
//! Within one direction delivery order matches enqueue order; nothing is
//! promised across directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use seele_model::{ContentPart, Role};
use seele_tools::{Decision, TodoItem};

use crate::status::StatusSnapshot;

/// Messages from the Soul to the UI.
#[derive(Debug, Clone)]
pub enum WireMessage {
    /// Incremental LLM output (text, think, or image parts).
    StreamedMessagePart { part: ContentPart, role: Role },
    /// A tool call is about to run.
    ToolCallStarted {
        id: String,
        name: String,
        argument_preview: String,
    },
    /// Incremental progress text from a running tool.
    ToolCallProgress { id: String, text: String },
    /// A tool call finished.
    ToolCallCompleted {
        id: String,
        result_summary: String,
        is_error: bool,
    },
    /// Superseded by later snapshots; UIs may coalesce.
    StatusUpdate(StatusSnapshot),
    /// The turn was cut short by cancellation or a fatal error.
    StepInterrupted { reason: Option<String> },
    /// The user must confirm a dangerous tool call.
    ApprovalRequest {
        id: String,
        tool_name: String,
        arguments: Value,
        danger_level: DangerLevel,
    },
    /// The todo list was replaced by the set_todo_list tool.
    TodoUpdate(Vec<TodoItem>),
    /// The Soul finished processing the current user turn.
    TurnCompleted,
}

/// How risky the requested action is.  Pure-read tools never reach the
/// approval gate, so requests currently always carry `Dangerous`; the field
/// exists so UIs can grade their prompt once finer classes appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerLevel {
    ReadOnly,
    Dangerous,
}

/// Messages from the UI to the Soul.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Out-of-band user input, injected at the next loop iteration.
    UserInput { text: String },
    /// Answer to a previous [`WireMessage::ApprovalRequest`], matched by id.
    ApprovalResponse { id: String, decision: Decision },
    /// Stop the in-flight turn.
    Cancel,
}

/// The peer hung up; no further messages will arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wire closed")]
pub struct WireClosed;

/// Create a connected wire and return its two endpoints.
pub fn channel() -> (SoulSide, UiSide) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
    (
        SoulSide {
            tx: out_tx,
            control_rx: ctl_rx,
        },
        UiSide {
            rx: out_rx,
            control_tx: ctl_tx,
        },
    )
}

/// The Soul's endpoint.
pub struct SoulSide {
    tx: mpsc::UnboundedSender<WireMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl SoulSide {
    /// Non-blocking enqueue.  A closed peer is not an error for the Soul:
    /// the turn keeps running and remains consistent in the session log.
    pub fn send(&self, msg: WireMessage) {
        let _ = self.tx.send(msg);
    }

    /// A cloned sender for subsystems (approval, tool forwarders) that emit
    /// on the Soul's behalf.
    pub fn sender(&self) -> mpsc::UnboundedSender<WireMessage> {
        self.tx.clone()
    }

    /// Await the next control message.  Fails with [`WireClosed`] once the
    /// UI endpoint is gone and the queue is drained.
    pub async fn recv_control(&mut self) -> Result<ControlMessage, WireClosed> {
        self.control_rx.recv().await.ok_or(WireClosed)
    }

    /// Signal EOF to the UI.  Already-enqueued messages are still delivered.
    pub fn close(self) {}

    /// Decompose into the raw sender and control receiver.  Used by the Soul,
    /// which runs its control receive loop in a separate task.
    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<WireMessage>,
        mpsc::UnboundedReceiver<ControlMessage>,
    ) {
        (self.tx, self.control_rx)
    }
}

/// The UI's endpoint.
pub struct UiSide {
    rx: mpsc::UnboundedReceiver<WireMessage>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl UiSide {
    /// Await the next message from the Soul.  Fails with [`WireClosed`] once
    /// the Soul endpoint is gone and the queue is drained.
    pub async fn recv(&mut self) -> Result<WireMessage, WireClosed> {
        self.rx.recv().await.ok_or(WireClosed)
    }

    /// Non-blocking enqueue toward the Soul.
    pub fn send_control(&self, msg: ControlMessage) {
        let _ = self.control_tx.send(msg);
    }

    /// Signal EOF to the Soul.  Already-enqueued messages are still delivered.
    pub fn close(self) {}
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
