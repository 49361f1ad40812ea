// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seele_model::{
    check_message, Capability, ChatProvider, ContentPart, Message, Role, StepRequest, StepResult,
    StreamEvent, ToolCallRequest,
};
use seele_tools::{tool_result_to_message, ApprovalGate, ToolCall, ToolCtx, ToolEvent, Toolset};

use crate::{
    approval::Approval,
    compact,
    context::Context,
    denwa::DenwaRenji,
    error::SoulError,
    session::Session,
    status::{Phase, StatusSnapshot},
    wire::{ControlMessage, SoulSide, WireMessage},
};

/// Shared services and limits, immutable after construction.
pub struct Runtime {
    pub provider: Arc<dyn ChatProvider>,
    pub max_steps: u32,
    pub max_retries: u32,
    pub approval: Arc<Approval>,
    pub denwa_renji: Arc<DenwaRenji>,
    pub cwd: PathBuf,
}

/// How a successful turn ended.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The assistant message that closed the turn (no tool calls).
    pub final_message: Option<Message>,
    /// Model calls spent.  D-Mail reverts do not count extra steps.
    pub steps: u32,
}

const DMAIL_NOTICE: &str = "\
You received a D-Mail from your future self. The work it describes was \
already attempted and the conversation has been rolled back to this point; \
side effects in the working directory may remain. Never mention the D-Mail \
to the user. D-Mail content:";

/// The agent-loop engine.  Owns the context and session and drives one user
/// turn at a time: checkpoint, step, dispatch tools, handle D-Mail, repeat.
pub struct Soul {
    runtime: Runtime,
    toolset: Arc<Toolset>,
    context: Context,
    session: Session,
    wire_tx: mpsc::UnboundedSender<WireMessage>,
    control_rx: Arc<Mutex<mpsc::UnboundedReceiver<ControlMessage>>>,
    /// Out-of-band user inputs queued by the control task, drained at the
    /// top of each loop iteration.
    injected: Arc<StdMutex<Vec<String>>>,
}

impl Soul {
    pub fn new(
        runtime: Runtime,
        toolset: Arc<Toolset>,
        context: Context,
        session: Session,
        wire: SoulSide,
    ) -> Self {
        let (wire_tx, control_rx) = wire.split();
        Self {
            runtime,
            toolset,
            context,
            session,
            wire_tx,
            control_rx: Arc::new(Mutex::new(control_rx)),
            injected: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn status(&self, phase: Phase, step: u32, pending_tool_calls: usize) -> StatusSnapshot {
        let (context_tokens, context_limit) = self.context.usage();
        StatusSnapshot {
            context_tokens,
            context_limit,
            step,
            phase,
            pending_tool_calls,
        }
    }

    /// Process one user turn.
    pub async fn run(&mut self, user_text: &str) -> Result<TurnOutcome, SoulError> {
        self.run_message(Message::user(user_text)).await
    }

    /// Like [`run`] but accepts a pre-built user message (e.g. with image
    /// parts).
    pub async fn run_message(&mut self, user_message: Message) -> Result<TurnOutcome, SoulError> {
        let cancel = CancellationToken::new();
        self.runtime.approval.set_cancel_token(cancel.clone());
        let router = self.spawn_control_router(cancel.clone());

        let result = self.turn(user_message, &cancel).await;

        router.abort();
        let _ = router.await;

        match &result {
            Ok(_) => {}
            Err(SoulError::Cancelled) => {
                self.send(WireMessage::StepInterrupted { reason: None });
            }
            Err(e) => {
                self.send(WireMessage::StepInterrupted {
                    reason: Some(e.to_string()),
                });
            }
        }
        self.emit_status(Phase::Idle, 0, 0);
        self.send(WireMessage::TurnCompleted);
        result
    }

    /// Route control messages for the duration of one run.  Aborted on exit.
    fn spawn_control_router(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let control = Arc::clone(&self.control_rx);
        let approval = Arc::clone(&self.runtime.approval);
        let injected = Arc::clone(&self.injected);
        tokio::spawn(async move {
            let mut rx = control.lock().await;
            while let Some(msg) = rx.recv().await {
                match msg {
                    ControlMessage::ApprovalResponse { id, decision } => {
                        approval.resolve(&id, decision);
                    }
                    ControlMessage::Cancel => {
                        info!("cancel requested over the wire");
                        cancel.cancel();
                    }
                    ControlMessage::UserInput { text } => {
                        injected.lock().unwrap().push(text);
                    }
                }
            }
        })
    }

    async fn turn(
        &mut self,
        user_message: Message,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SoulError> {
        let caps = self.runtime.provider.capabilities();
        let missing = check_message(&user_message, &caps);
        if !missing.is_empty() {
            return Err(SoulError::LlmNotSupported { missing });
        }

        if self.session.is_empty() {
            let title: String = user_message.extract_text(" ").chars().take(64).collect();
            if !title.is_empty() {
                let _ = self.session.set_title(title);
            }
        }

        self.append(user_message)?;
        self.emit_status(Phase::Idle, 0, 0);

        let mut step_no: u32 = 1;
        loop {
            if step_no > self.runtime.max_steps {
                return Err(SoulError::MaxStepsReached(self.runtime.max_steps));
            }
            if cancel.is_cancelled() {
                return Err(SoulError::Cancelled);
            }
            self.inject_pending_inputs()?;

            // Compaction only ever runs at the top of an iteration, never
            // mid-step.
            if self.context.needs_compaction() {
                self.compact(cancel, step_no).await?;
            }

            self.context.checkpoint();
            self.runtime
                .denwa_renji
                .set_n_checkpoints(self.context.n_checkpoints());

            debug!(step = step_no, "beginning step");
            self.emit_status(Phase::Generating, step_no, 0);
            let step = self.step_with_retry(cancel).await?;

            self.append(step.message.clone())?;
            self.emit_status(Phase::Generating, step_no, step.tool_calls.len());

            if !step.tool_calls.is_empty() {
                self.emit_status(Phase::ToolRunning, step_no, step.tool_calls.len());
                self.run_tools(&step.tool_calls, cancel, &caps).await?;
            }

            if cancel.is_cancelled() {
                return Err(SoulError::Cancelled);
            }

            // Tool dispatch completed before this check, so a D-Mail written
            // by any tool in this step is visible here.
            if let Some(dmail) = self.runtime.denwa_renji.fetch_pending() {
                self.emit_status(Phase::Reverting, step_no, 0);
                info!(checkpoint = dmail.checkpoint_id, "D-Mail received; reverting");
                let len_before = self.context.len();
                self.context.revert_to(dmail.checkpoint_id)?;
                // The log can be longer than the live context (compaction
                // shrinks only the context), so the tombstone index comes
                // from the log's own length minus what the revert dropped.
                // Checkpoints always sit at or after the compacted prefix,
                // so every dropped message has a log record.
                let dropped = len_before - self.context.len();
                self.session
                    .tombstone(self.session.len().saturating_sub(dropped))
                    .map_err(|e| SoulError::SessionIo(e.to_string()))?;
                self.context.checkpoint();
                self.runtime
                    .denwa_renji
                    .set_n_checkpoints(self.context.n_checkpoints());
                self.append(Message::user(format!(
                    "{DMAIL_NOTICE}\n\n{}",
                    dmail.message.trim()
                )))?;
                self.emit_status(Phase::Reverting, step_no, 0);
                // The step is retried in the rewritten timeline: step_no is
                // deliberately not incremented.
                continue;
            }

            if step.tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    final_message: Some(step.message),
                    steps: step_no,
                });
            }
            step_no += 1;
        }
    }

    /// Append to the durable session log first, then to the in-memory
    /// context, so the context never holds a message the log might lose.
    fn append(&mut self, msg: Message) -> Result<(), SoulError> {
        self.session
            .append(&msg)
            .map_err(|e| SoulError::SessionIo(e.to_string()))?;
        self.context.append(msg);
        Ok(())
    }

    fn inject_pending_inputs(&mut self) -> Result<(), SoulError> {
        let pending: Vec<String> = std::mem::take(&mut *self.injected.lock().unwrap());
        for text in pending {
            debug!("injecting out-of-band user input");
            self.append(Message::user(text))?;
        }
        Ok(())
    }

    async fn step_with_retry(&mut self, cancel: &CancellationToken) -> Result<StepResult, SoulError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let req = StepRequest {
                messages: self.context.snapshot(),
                tools: self.toolset.advertise(),
            };
            match self.exec_step(req, cancel, true).await {
                Ok(res) => return Ok(res),
                Err(SoulError::LlmTransient(msg)) if attempts <= self.runtime.max_retries => {
                    let delay = retry_delay(attempts);
                    warn!(
                        attempt = attempts,
                        "transient model failure: {msg}; retrying in {:.1}s",
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SoulError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One streamed model call.  When `forward` is set, every part is pushed
    /// over the wire as it arrives; the summarizer call runs silent.
    async fn exec_step(
        &self,
        req: StepRequest,
        cancel: &CancellationToken,
        forward: bool,
    ) -> Result<StepResult, SoulError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SoulError::Cancelled),
            res = self.runtime.provider.step(req) => res.map_err(SoulError::from)?,
        };

        let mut text = String::new();
        let mut think = String::new();
        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
        let mut usage = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SoulError::Cancelled),
                ev = stream.next() => ev,
            };
            let Some(event) = event else { break };
            match event.map_err(SoulError::from)? {
                StreamEvent::TextDelta(delta) => {
                    if forward {
                        self.send(WireMessage::StreamedMessagePart {
                            part: ContentPart::text(&delta),
                            role: Role::Assistant,
                        });
                    }
                    text.push_str(&delta);
                }
                StreamEvent::ThinkDelta(delta) => {
                    if forward {
                        self.send(WireMessage::StreamedMessagePart {
                            part: ContentPart::think(&delta),
                            role: Role::Assistant,
                        });
                    }
                    think.push_str(&delta);
                }
                StreamEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.arguments.push_str(&arguments);
                }
                StreamEvent::Usage(u) => usage = Some(u),
                StreamEvent::Done => break,
            }
        }

        let mut content = Vec::new();
        if !think.is_empty() {
            content.push(ContentPart::think(think));
        }
        if !text.is_empty() {
            content.push(ContentPart::text(text));
        }

        // Flush accumulated parallel tool calls, ordered by index.  A call
        // with an empty name cannot be dispatched and is dropped; an empty
        // id gets a synthetic fallback so the turn can still complete.
        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in pending.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            let id = if ptc.id.is_empty() {
                warn!(tool = %ptc.name, "tool call had empty id; generating synthetic id");
                format!("tc_synthetic_{i}")
            } else {
                ptc.id
            };
            let arguments = if ptc.arguments.is_empty() {
                "{}".to_string()
            } else {
                ptc.arguments
            };
            tool_calls.push(ToolCallRequest {
                id,
                name: ptc.name,
                arguments,
            });
        }

        let message = Message::new(Role::Assistant, content).with_tool_calls(tool_calls.clone());
        Ok(StepResult {
            message,
            tool_calls,
            usage,
        })
    }

    /// Dispatch one step's tool calls concurrently and append their results
    /// in call order.
    async fn run_tools(
        &mut self,
        requests: &[ToolCallRequest],
        cancel: &CancellationToken,
        caps: &HashSet<Capability>,
    ) -> Result<(), SoulError> {
        let calls: Vec<ToolCall> = requests
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                args: serde_json::from_str(&tc.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        for tc in requests {
            self.send(WireMessage::ToolCallStarted {
                id: tc.id.clone(),
                name: tc.name.clone(),
                argument_preview: preview(&tc.arguments),
            });
        }

        // Progress events flow through their own channel so tools can stream
        // while the dispatch group is still running.
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<ToolEvent>();
        let wire = self.wire_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(ev) = ev_rx.recv().await {
                match ev {
                    ToolEvent::Progress { call_id, text } => {
                        let _ = wire.send(WireMessage::ToolCallProgress { id: call_id, text });
                    }
                    ToolEvent::TodoUpdate(todos) => {
                        let _ = wire.send(WireMessage::TodoUpdate(todos));
                    }
                }
            }
        });

        let ctx = ToolCtx::new(
            self.runtime.cwd.clone(),
            self.session.id().to_string(),
            Arc::clone(&self.runtime.approval) as Arc<dyn ApprovalGate>,
            cancel.child_token(),
            ev_tx,
        );
        let results = self.toolset.dispatch_all(&calls, &ctx).await;
        drop(ctx);
        let _ = forwarder.await;

        for result in &results {
            self.send(WireMessage::ToolCallCompleted {
                id: result.id.clone(),
                result_summary: result.summary(),
                is_error: result.is_error(),
            });
            let msg = tool_result_to_message(result);
            let missing = check_message(&msg, caps);
            if !missing.is_empty() {
                return Err(SoulError::LlmNotSupported { missing });
            }
            self.append(msg)?;
        }
        Ok(())
    }

    /// Summarize the history and rebuild the context as
    /// `[system, summary, tail]`.  On failure the context is untouched and
    /// the turn aborts with [`SoulError::ContextOverflow`].
    async fn compact(&mut self, cancel: &CancellationToken, step_no: u32) -> Result<(), SoulError> {
        self.emit_status(Phase::Compacting, step_no, 0);
        let (tokens_before, limit) = self.context.usage();
        info!(tokens_before, limit, "context over threshold; compacting");

        let req = StepRequest {
            messages: compact::summary_request(self.context.history()),
            tools: Vec::new(),
        };

        let mut attempts: u32 = 0;
        let summary_text = loop {
            attempts += 1;
            match self.exec_step(req.clone(), cancel, false).await {
                Ok(res) => break res.message.extract_text("\n"),
                Err(SoulError::Cancelled) => return Err(SoulError::Cancelled),
                Err(SoulError::LlmTransient(msg)) if attempts <= self.runtime.max_retries => {
                    let delay = retry_delay(attempts);
                    warn!("summarizer failed transiently: {msg}; retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SoulError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(SoulError::ContextOverflow(e.to_string())),
            }
        };
        if summary_text.trim().is_empty() {
            return Err(SoulError::ContextOverflow(
                "summarizer returned an empty summary".into(),
            ));
        }

        let split = compact::tail_start(self.context.history());
        let tail = self.context.history()[split..].to_vec();
        self.context
            .apply_compacted(Message::assistant(summary_text), tail);
        self.runtime.denwa_renji.set_n_checkpoints(0);

        let (tokens_after, _) = self.context.usage();
        info!(tokens_before, tokens_after, "compaction complete");
        self.emit_status(Phase::Compacting, step_no, 0);
        Ok(())
    }

    fn emit_status(&self, phase: Phase, step: u32, pending_tool_calls: usize) {
        self.send(WireMessage::StatusUpdate(self.status(
            phase,
            step,
            pending_tool_calls,
        )));
    }

    fn send(&self, msg: WireMessage) {
        let _ = self.wire_tx.send(msg);
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// First line of the argument JSON, capped for display.
fn preview(arguments: &str) -> String {
    let line = arguments.lines().next().unwrap_or("");
    let mut p: String = line.chars().take(120).collect();
    if p.len() < line.len() {
        p.push('…');
    }
    p
}

/// Exponential backoff capped at 5s, plus up to 0.5s of jitter.
fn retry_delay(attempt: u32) -> Duration {
    let base = 0.3 * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(5.0);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.5);
    Duration::from_secs_f64(capped + jitter)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        let d1 = retry_delay(1);
        let d4 = retry_delay(4);
        assert!(d1 < d4);
        assert!(retry_delay(30) <= Duration::from_secs_f64(5.5));
    }

    #[test]
    fn preview_caps_long_arguments() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert!(p.chars().count() <= 121);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn preview_takes_first_line_only() {
        assert_eq!(preview("{\"a\":1}\nrest"), "{\"a\":1}");
    }
}
