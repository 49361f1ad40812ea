// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tool::{TodoItem, Tool, ToolCall, ToolCtx, ToolError, ToolEvent, ToolOutput};

/// Replace the agent's visible todo list.  Pure state tool; never requires
/// approval.
pub struct SetTodoListTool;

#[derive(Deserialize)]
struct SetTodoParams {
    todos: Vec<TodoItem>,
}

#[async_trait]
impl Tool for SetTodoListTool {
    fn name(&self) -> &str {
        "set_todo_list"
    }

    fn description(&self) -> &str {
        "Replace the todo list shown to the user. Use it to plan multi-step \
         work and to mark steps completed as you go."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            }
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: SetTodoParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;

        let count = params.todos.len();
        ctx.emit(ToolEvent::TodoUpdate(params.todos));
        Ok(ToolOutput::Text(format!("Todo list updated ({count} items).")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
