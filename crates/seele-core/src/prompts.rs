// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

const BASE_PROMPT: &str = "\
You are seele, an AI coding agent running in the user's terminal.

You help with software engineering tasks: reading and editing code, running \
commands, and answering questions about the project. Be precise and direct. \
Prefer making tool calls over describing what you would do. When a task needs \
several actions, keep going until it is done rather than handing the plan \
back to the user.

Rules:
- Never invent file contents or command output; read or run instead.
- Keep answers short. The user is in a terminal, not a browser.
- Use set_todo_list for multi-step work so the user can follow along.
- Dangerous actions (shell commands, file writes) may require the user's \
approval; a denied call is an answer, not an obstacle to work around.";

const DMAIL_PROMPT: &str = "\
You can send a D-Mail with send_dmail: the conversation rolls back to an \
earlier checkpoint and continues with your message injected. Use it when a \
long exploration turned out to be a dead end and the context is better off \
without it.";

/// Build the system prompt for a session rooted at `cwd`.
///
/// `custom` replaces the default prompt entirely; the working directory and
/// D-Mail sections are always appended.
pub fn system_prompt(cwd: &Path, custom: Option<&str>, with_dmail: bool) -> String {
    let mut prompt = custom.unwrap_or(BASE_PROMPT).to_string();
    prompt.push_str(&format!("\n\nWorking directory: {}", cwd.display()));
    if with_dmail {
        prompt.push_str("\n\n");
        prompt.push_str(DMAIL_PROMPT);
    }
    prompt
}

/// Prompt used for the sub-agent spawned by the task tool.
pub fn subagent_prompt(cwd: &Path, task: &str) -> String {
    format!(
        "You are a focused sub-agent with read-only tools. Complete the \
         following task and reply with your findings as plain text; your \
         final message is returned verbatim to the parent agent.\n\n\
         Task: {task}\n\nWorking directory: {}",
        cwd.display()
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
