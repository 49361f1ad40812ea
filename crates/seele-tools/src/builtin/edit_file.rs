// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolCtx, ToolError, ToolOutput};

/// Exact-match string replacement in one file.
///
/// `old_string` must match the file content exactly, including whitespace,
/// and must be unique unless `replace_all` is set.  Requiring uniqueness
/// keeps a vague match from silently editing the wrong occurrence.
pub struct EditFileTool;

#[derive(Deserialize)]
struct EditFileParams {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. old_string must match the file \
         content exactly (including indentation) and must occur exactly once, \
         unless replace_all is true. Use read_file first to copy the exact \
         text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring a unique match"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn dangerous(&self) -> bool {
        true
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: EditFileParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;
        if params.old_string == params.new_string {
            return Err(ToolError::validation("old_string and new_string are identical"));
        }
        if params.old_string.is_empty() {
            return Err(ToolError::validation("old_string must not be empty"));
        }

        let path = {
            let p = std::path::PathBuf::from(&params.path);
            if p.is_absolute() {
                p
            } else {
                ctx.cwd.join(p)
            }
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::runtime(format!("cannot read {}: {e}", path.display())))?;

        let occurrences = content.matches(&params.old_string).count();
        if occurrences == 0 {
            return Err(ToolError::runtime(format!(
                "old_string not found in {}",
                path.display()
            )));
        }
        if occurrences > 1 && !params.replace_all {
            return Err(ToolError::runtime(format!(
                "old_string occurs {occurrences} times in {}; provide more \
                 context or set replace_all",
                path.display()
            )));
        }

        let updated = if params.replace_all {
            content.replace(&params.old_string, &params.new_string)
        } else {
            content.replacen(&params.old_string, &params.new_string, 1)
        };
        tokio::fs::write(&path, updated.as_bytes())
            .await
            .map_err(|e| ToolError::runtime(format!("cannot write {}: {e}", path.display())))?;

        debug!(path = %path.display(), occurrences, "edited file");
        let replaced = if params.replace_all { occurrences } else { 1 };
        Ok(ToolOutput::Text(format!(
            "Replaced {replaced} occurrence(s) in {}",
            path.display()
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
