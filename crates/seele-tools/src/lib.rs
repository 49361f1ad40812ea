// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::Toolset;
pub use tool::{
    tool_result_to_message, ApprovalGate, ApprovalWaitAborted, Decision, TodoItem, Tool, ToolCall,
    ToolCtx, ToolError, ToolErrorKind, ToolEvent, ToolOutput, ToolResult,
};

pub use builtin::edit_file::EditFileTool;
pub use builtin::fs::{ListDirTool, ReadFileTool, WriteFileTool};
pub use builtin::grep::GrepTool;
pub use builtin::shell::ShellTool;
pub use builtin::todo::SetTodoListTool;
