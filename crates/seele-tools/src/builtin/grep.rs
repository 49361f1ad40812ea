// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolCtx, ToolError, ToolOutput};

/// Directories that are never worth searching.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

/// Regex search over the working tree, `file:line:text` output.
pub struct GrepTool;

#[derive(Deserialize)]
struct GrepParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_sensitive: Option<bool>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matches as \
         file:line:text, capped at limit (default 100). Skips .git, target, \
         node_modules and other generated directories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (default: working directory)"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Case-sensitive search (default true)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 100)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolCtx) -> Result<ToolOutput, ToolError> {
        let params: GrepParams = serde_json::from_value(call.args.clone())
            .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))?;

        let re = RegexBuilder::new(&params.pattern)
            .case_insensitive(!params.case_sensitive.unwrap_or(true))
            .build()
            .map_err(|e| ToolError::validation(format!("invalid pattern: {e}")))?;

        let root = match params.path.as_deref() {
            Some(p) => {
                let pb = std::path::PathBuf::from(p);
                if pb.is_absolute() {
                    pb
                } else {
                    ctx.cwd.join(pb)
                }
            }
            None => ctx.cwd.clone(),
        };
        let limit = params.limit.unwrap_or(100);
        debug!(pattern = %params.pattern, root = %root.display(), "grep");

        // File walking is blocking IO; run it off the async executor.
        let cancel = ctx.cancel.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
                !e.file_name()
                    .to_str()
                    .map(|n| SKIP_DIRS.contains(&n))
                    .unwrap_or(false)
            });
            for entry in walker.flatten() {
                if cancel.is_cancelled() || matches.len() >= limit {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue; // binary or unreadable
                };
                for (lineno, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(format!(
                            "{}:{}:{}",
                            entry.path().display(),
                            lineno + 1,
                            line.trim_end()
                        ));
                        if matches.len() >= limit {
                            break;
                        }
                    }
                }
            }
            matches
        })
        .await
        .map_err(|e| ToolError::runtime(format!("search task failed: {e}")))?;

        if matches.is_empty() {
            Ok(ToolOutput::Text("(no matches)".into()))
        } else {
            Ok(ToolOutput::Text(matches.join("\n")))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

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

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "grep".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet needle = 1;\n").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/b.rs"), "let needle = 2;\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = fixture();
        let out = GrepTool
            .invoke(&call(json!({"pattern": "needle"})), &ctx_in(dir.path()))
            .await
            .unwrap();
        match out {
            ToolOutput::Text(t) => {
                assert!(t.contains("a.rs:2:"));
                assert!(!t.contains("target"), "generated dirs are skipped");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_matches_reports_cleanly() {
        let dir = fixture();
        let out = GrepTool
            .invoke(&call(json!({"pattern": "haystack_only"})), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t == "(no matches)"));
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = fixture();
        let out = GrepTool
            .invoke(
                &call(json!({"pattern": "NEEDLE", "case_sensitive": false})),
                &ctx_in(dir.path()),
            )
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Text(t) if t.contains("a.rs")));
    }

    #[tokio::test]
    async fn invalid_regex_is_validation_error() {
        let dir = fixture();
        let err = GrepTool
            .invoke(&call(json!({"pattern": "("})), &ctx_in(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ToolErrorKind::Validation);
    }

    #[tokio::test]
    async fn limit_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        let many = "hit\n".repeat(50);
        std::fs::write(dir.path().join("m.txt"), many).unwrap();
        let out = GrepTool
            .invoke(
                &call(json!({"pattern": "hit", "limit": 3})),
                &ctx_in(dir.path()),
            )
            .await
            .unwrap();
        match out {
            ToolOutput::Text(t) => assert_eq!(t.lines().count(), 3),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn grep_is_not_dangerous() {
        assert!(!GrepTool.dangerous());
    }
}
