// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolCtx, ToolError, ToolOutput};

/// Resolve `path` against the session working directory.
fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        cwd.join(p)
    }
}

// ─── read_file ────────────────────────────────────────────────────────────────

/// Read a file, optionally windowed by line offset and limit.
pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadFileParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file. Use offset (1-based line number) and limit \
         to read a window of a large file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, absolute or relative to the working directory" },
                "offset": { "type": "integer", "description": "1-based first line to read" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: ReadFileParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;
        let path = resolve(&ctx.cwd, &params.path);

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::runtime(format!("cannot read {}: {e}", path.display())))?;

        let output = match (params.offset, params.limit) {
            (None, None) => text,
            (offset, limit) => {
                let start = offset.unwrap_or(1).saturating_sub(1);
                let take = limit.unwrap_or(usize::MAX);
                text.lines()
                    .skip(start)
                    .take(take)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        Ok(ToolOutput::Text(output))
    }
}

// ─── write_file ───────────────────────────────────────────────────────────────

/// Create or overwrite a file with the given content.
pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and any missing parent \
         directories) or replacing its previous content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination path" },
                "content": { "type": "string", "description": "Full file content to write" }
            },
            "required": ["path", "content"]
        })
    }

    fn dangerous(&self) -> bool {
        true
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: WriteFileParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;
        let path = resolve(&ctx.cwd, &params.path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::runtime(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, params.content.as_bytes())
            .await
            .map_err(|e| ToolError::runtime(format!("cannot write {}: {e}", path.display())))?;

        Ok(ToolOutput::Text(format!(
            "Wrote {} bytes to {}",
            params.content.len(),
            path.display()
        )))
    }
}

// ─── list_dir ─────────────────────────────────────────────────────────────────

/// List a directory's entries, sorted, with a trailing `/` on directories.
pub struct ListDirTool;

#[derive(Deserialize)]
struct ListDirParams {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (defaults to the working directory)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list; defaults to the working directory" }
            }
        })
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: ListDirParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;
        let path = match params.path.as_deref() {
            Some(p) => resolve(&ctx.cwd, p),
            None => ctx.cwd.clone(),
        };

        let mut rd = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::runtime(format!("cannot list {}: {e}", path.display())))?;

        let mut entries = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| ToolError::runtime(format!("cannot list {}: {e}", path.display())))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(ToolOutput::Text(entries.join("\n")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
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

    fn ctx_in(dir: &Path) -> ToolCtx {
        let (tx, _rx) = mpsc::unbounded_channel::<ToolEvent>();
        ToolCtx::new(
            dir.to_path_buf(),
            "s".into(),
            Arc::new(AllowAll),
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

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());

        let out = WriteFileTool
            .invoke(&call("write_file", json!({"path": "a.txt", "content": "line1\nline2"})), &ctx)
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t.contains("a.txt")));

        let out = ReadFileTool
            .invoke(&call("read_file", json!({"path": "a.txt"})), &ctx)
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t == "line1\nline2"));
    }

    #[tokio::test]
    async fn read_file_window_applies_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n.txt"), "1\n2\n3\n4\n5").unwrap();
        let ctx = ctx_in(dir.path());

        let out = ReadFileTool
            .invoke(&call("read_file", json!({"path": "n.txt", "offset": 2, "limit": 2})), &ctx)
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t == "2\n3"));
    }

    #[tokio::test]
    async fn read_missing_file_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .invoke(&call("read_file", json!({"path": "nope.txt"})), &ctx_in(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ToolErrorKind::Runtime);
    }

    #[tokio::test]
    async fn list_dir_sorts_and_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let out = ListDirTool
            .invoke(&call("list_dir", json!({})), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t == "a/\nb.txt"));
    }

    #[test]
    fn write_is_dangerous_reads_are_not() {
        assert!(WriteFileTool.dangerous());
        assert!(!ReadFileTool.dangerous());
        assert!(!ListDirTool.dangerous());
    }
}
