use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use seele_model::ChatProvider;
use seele_tools::{
    GrepTool, ListDirTool, ReadFileTool, Tool, ToolCall, ToolCtx, ToolError, ToolOutput, Toolset,
};

use crate::{
    approval::Approval, context::Context, denwa::DenwaRenji, prompts, session::Session,
    soul::{Runtime, Soul}, wire,
};

const MAX_DEPTH: usize = 2;
const SUBAGENT_MAX_STEPS: u32 = 15;

/// Spawn a focused sub-agent over a read-only toolset and return its final
/// text.  The sub-agent gets an ephemeral session, auto-approval (its tools
/// cannot mutate anything), and no D-Mail machinery.
pub struct TaskTool {
    provider: Arc<dyn ChatProvider>,
    token_limit: usize,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(provider: Arc<dyn ChatProvider>, token_limit: usize, depth: Arc<AtomicUsize>) -> Self {
        Self {
            provider,
            token_limit,
            depth,
        }
    }

    fn build_sub_toolset() -> Toolset {
        let mut tools = Toolset::new();
        tools.register(ReadFileTool);
        tools.register(ListDirTool);
        tools.register(GrepTool);
        // TaskTool is intentionally not registered here to limit nesting.
        tools
    }
}

#[derive(Deserialize)]
struct TaskParams {
    prompt: String,
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused read-only task (exploring \
         the codebase, summarising files) and return its final text output. \
         The sub-agent cannot write files or run commands."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: TaskParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;

        let current = self.depth.load(Ordering::Relaxed);
        if current >= MAX_DEPTH {
            return Err(ToolError::runtime(format!(
                "maximum sub-agent depth ({MAX_DEPTH}) reached"
            )));
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(depth = current + 1, "task: spawning sub-agent");

        let result = self.run_subagent(&params.prompt, ctx).await;

        self.depth.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

impl TaskTool {
    async fn run_subagent(&self, prompt: &str, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let (soul_side, mut ui_side) = wire::channel();
        // Nothing reads the sub-agent's wire; drain it so nothing piles up.
        let drain = tokio::spawn(async move { while ui_side.recv().await.is_ok() {} });

        let approval = Arc::new(Approval::new(soul_side.sender()));
        approval.set_yolo(true);

        let runtime = Runtime {
            provider: Arc::clone(&self.provider),
            max_steps: SUBAGENT_MAX_STEPS,
            max_retries: 2,
            approval,
            denwa_renji: Arc::new(DenwaRenji::new()),
            cwd: ctx.cwd.clone(),
        };
        let context = Context::new(
            prompts::subagent_prompt(&ctx.cwd, prompt),
            self.token_limit,
            0.8,
        );
        let session = Session::ephemeral()
            .map_err(|e| ToolError::runtime(format!("cannot create sub-agent session: {e}")))?;

        let mut soul = Soul::new(
            runtime,
            Arc::new(Self::build_sub_toolset()),
            context,
            session,
            soul_side,
        );

        let outcome = soul.run(prompt).await;
        drop(soul);
        let _ = drain.await;

        match outcome {
            Ok(turn) => {
                let text = turn
                    .final_message
                    .map(|m| m.extract_text("\n"))
                    .unwrap_or_default();
                if text.is_empty() {
                    Ok(ToolOutput::Text("(sub-agent produced no text output)".into()))
                } else {
                    Ok(ToolOutput::Text(text))
                }
            }
            Err(e) => Err(ToolError::runtime(format!("sub-agent error: {e}"))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
