// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use seele_model::ToolSpec;

use crate::tool::{
    Decision, Tool, ToolCall, ToolCtx, ToolError, ToolOutput, ToolResult,
};

/// Central registry holding all available tools, in registration order.
#[derive(Default)]
pub struct Toolset {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl Toolset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Re-registering a name replaces the earlier tool but
    /// keeps its position.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every registered tool, in registration order, as sent
    /// with each model request.
    pub fn advertise(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Dispatch one tool call: resolve → validate → approve → invoke.
    ///
    /// Every failure path is folded into the returned [`ToolResult`]; this
    /// function never aborts the turn.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolCtx) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return ToolResult::err(
                &call.id,
                ToolError::validation(format!("unknown tool: {}", call.name)),
            );
        };

        if let Err(e) = validate_args(&tool.parameters_schema(), &call.args) {
            debug!(tool = %call.name, error = %e, "argument validation failed");
            return ToolResult::err(&call.id, e);
        }

        if tool.dangerous() {
            match ctx.approval.request(&call.name, &call.args).await {
                Ok(Decision::AllowOnce) | Ok(Decision::AllowAlways) => {}
                Ok(Decision::Deny) => {
                    return ToolResult::err(&call.id, ToolError::denied());
                }
                Err(_) => {
                    // The turn is being cancelled; the loop discards this
                    // result on its way out.
                    return ToolResult::err(&call.id, ToolError::runtime("cancelled"));
                }
            }
        }

        let outcome = match tool.timeout() {
            Some(limit) => match tokio::time::timeout(limit, tool.invoke(call, ctx)).await {
                Ok(res) => res,
                Err(_) => Err(ToolError::timeout(format!(
                    "tool exceeded its {}s time limit",
                    limit.as_secs()
                ))),
            },
            None => tool.invoke(call, ctx).await,
        };

        ToolResult {
            id: call.id.clone(),
            outcome,
        }
    }

    /// Dispatch all of one step's tool calls concurrently.
    ///
    /// Each call runs in its own task so one panic does not cancel the
    /// others; results come back in `calls` order regardless of completion
    /// order, which keeps history deterministic.
    pub async fn dispatch_all(self: &Arc<Self>, calls: &[ToolCall], ctx: &ToolCtx) -> Vec<ToolResult> {
        let mut tasks = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let toolset = Arc::clone(self);
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(
                async move { toolset.dispatch(&call, &ctx).await },
            ));
        }

        let mut results = Vec::with_capacity(calls.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let result = match task.await {
                Ok(r) => r,
                Err(e) => {
                    warn!(tool = %calls[i].name, "tool task panicked: {e}");
                    ToolResult::err(
                        &calls[i].id,
                        ToolError::runtime(format!("tool panicked: {e}")).unexpected(),
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

/// Check `args` against the tool's declared JSON schema.
///
/// This is a structural pre-check (object shape + required keys); tools then
/// deserialize their typed params, and serde failures also surface as
/// validation errors.
fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(obj) = args.as_object() else {
        return Err(ToolError::validation("arguments must be a JSON object"));
    };
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(ToolError::validation(format!(
                    "missing required argument \"{key}\""
                )));
            }
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tool::{ApprovalGate, ApprovalWaitAborted, Decision, ToolEvent};

    /// Minimal no-op tool for registry tests.
    struct EchoTool {
        name: &'static str,
        dangerous: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "x": { "type": "integer" } }, "required": ["x"] })
        }
        fn dangerous(&self) -> bool {
            self.dangerous
        }
        async fn invoke(&self, call: &ToolCall, _ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(format!("echo:{}", call.args)))
        }
    }

    struct FixedGate(Decision);

    #[async_trait]
    impl ApprovalGate for FixedGate {
        async fn request(&self, _: &str, _: &Value) -> Result<Decision, ApprovalWaitAborted> {
            Ok(self.0)
        }
    }

    fn ctx(decision: Decision) -> ToolCtx {
        let (tx, _rx) = mpsc::unbounded_channel::<ToolEvent>();
        ToolCtx::new(
            PathBuf::from("."),
            "session".into(),
            Arc::new(FixedGate(decision)),
            CancellationToken::new(),
            tx,
        )
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            args,
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn advertise_preserves_registration_order() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "zz", dangerous: false });
        reg.register(EchoTool { name: "aa", dangerous: false });
        let names: Vec<String> = reg.advertise().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zz", "aa"]);
    }

    #[test]
    fn reregistering_same_name_replaces() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "t", dangerous: false });
        reg.register(EchoTool { name: "t", dangerous: true });
        assert_eq!(reg.names().len(), 1);
        assert!(reg.get("t").unwrap().dangerous());
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_validation_error() {
        let reg = Toolset::new();
        let out = reg.dispatch(&call("missing", json!({})), &ctx(Decision::AllowOnce)).await;
        match out.outcome {
            Err(e) => assert_eq!(e.kind, crate::ToolErrorKind::Validation),
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn dispatch_missing_required_arg_is_validation_error() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        let out = reg.dispatch(&call("echo", json!({})), &ctx(Decision::AllowOnce)).await;
        match out.outcome {
            Err(e) => {
                assert_eq!(e.kind, crate::ToolErrorKind::Validation);
                assert!(e.message.contains("\"x\""));
            }
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn dispatch_non_object_args_is_validation_error() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        let out = reg.dispatch(&call("echo", json!([1, 2])), &ctx(Decision::AllowOnce)).await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn dispatch_runs_tool_on_valid_args() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        let out = reg.dispatch(&call("echo", json!({"x": 1})), &ctx(Decision::AllowOnce)).await;
        match out.outcome {
            Ok(ToolOutput::Text(t)) => assert!(t.starts_with("echo:")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dangerous_tool_denied_is_not_invoked() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: true });
        let out = reg.dispatch(&call("echo", json!({"x": 1})), &ctx(Decision::Deny)).await;
        match out.outcome {
            Err(e) => {
                assert_eq!(e.kind, crate::ToolErrorKind::Denied);
                assert_eq!(e.message, "user denied");
            }
            Ok(_) => panic!("denied tool must not run"),
        }
    }

    #[tokio::test]
    async fn non_dangerous_tool_skips_approval() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        // A denying gate must not matter for a pure-read tool.
        let out = reg.dispatch(&call("echo", json!({"x": 1})), &ctx(Decision::Deny)).await;
        assert!(!out.is_error());
    }

    #[tokio::test]
    async fn dispatch_all_preserves_call_order() {
        let mut reg = Toolset::new();
        reg.register(EchoTool { name: "echo", dangerous: false });
        let reg = Arc::new(reg);
        let calls = vec![
            ToolCall { id: "a".into(), name: "echo".into(), args: json!({"x": 1}) },
            ToolCall { id: "b".into(), name: "echo".into(), args: json!({"x": 2}) },
            ToolCall { id: "c".into(), name: "echo".into(), args: json!({"x": 3}) },
        ];
        let results = reg.dispatch_all(&calls, &ctx(Decision::AllowOnce)).await;
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
