// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolCtx, ToolError, ToolOutput};

/// Run a shell command in the session's working directory.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Deserialize)]
struct ShellParams {
    command: String,
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined stdout/stderr output. \
         The command runs with `sh -c` in the current working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn dangerous(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.timeout_secs))
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: ShellParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;

        debug!(command = %params.command, "running shell command");
        ctx.progress(&call.id, format!("$ {}", params.command));

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::runtime(format!("failed to spawn shell: {e}")))?;

        let output = tokio::select! {
            res = child.wait_with_output() => {
                res.map_err(|e| ToolError::runtime(format!("failed to read output: {e}")))?
            }
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::runtime("cancelled"));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        if output.status.success() {
            Ok(ToolOutput::Text(text))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(ToolError::runtime(format!("command exited with status {code}")).with_output(text))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tool::{ApprovalGate, ApprovalWaitAborted, Decision, ToolEvent};

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
            Arc::new(AllowAll),
            CancellationToken::new(),
            tx,
        )
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            args,
        }
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let out = ShellTool::default()
            .invoke(&call(json!({"command": "echo hello"})), &ctx())
            .await
            .unwrap();
        match out {
            ToolOutput::Text(t) => assert_eq!(t.trim(), "hello"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_output() {
        let err = ShellTool::default()
            .invoke(&call(json!({"command": "echo oops >&2; exit 3"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.message.contains("status 3"));
        assert!(err.output.unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn missing_command_is_validation_error() {
        let err = ShellTool::default()
            .invoke(&call(json!({})), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ToolErrorKind::Validation);
    }

    #[test]
    fn shell_is_dangerous_and_bounded() {
        let t = ShellTool::default();
        assert!(t.dangerous());
        assert!(t.timeout().is_some());
    }
}
