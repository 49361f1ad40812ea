// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Non-interactive frontend: assistant text to stdout, everything else to
//! stderr.  Used for `-c/--command` so output pipes cleanly into other
//! tools.

use std::io::Write as _;

use seele_core::{ControlMessage, Soul, SoulError, TurnOutcome, UiSide, WireMessage};
use seele_model::ContentPart;
use seele_tools::Decision;

pub async fn run_print(
    mut soul: Soul,
    mut ui: UiSide,
    text: String,
) -> (Soul, Result<TurnOutcome, SoulError>) {
    let handle = tokio::spawn(async move {
        let result = soul.run(&text).await;
        (soul, result)
    });

    let mut printed_any = false;
    loop {
        let Ok(msg) = ui.recv().await else { break };
        match msg {
            WireMessage::StreamedMessagePart {
                part: ContentPart::Text { text },
                ..
            } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
                printed_any = true;
            }
            WireMessage::StreamedMessagePart { .. } => {}
            WireMessage::ToolCallStarted {
                name,
                argument_preview,
                ..
            } => {
                eprintln!("[tool] {name} {argument_preview}");
            }
            WireMessage::ToolCallProgress { text, .. } => {
                eprintln!("[tool] {text}");
            }
            WireMessage::ToolCallCompleted {
                result_summary,
                is_error,
                ..
            } => {
                let marker = if is_error { "error" } else { "done" };
                eprintln!("[tool] {marker}: {result_summary}");
            }
            // Non-interactive: deny anything that was not pre-approved.
            WireMessage::ApprovalRequest { id, tool_name, .. } => {
                eprintln!("[approval] denying {tool_name} (non-interactive; use --yolo to allow)");
                ui.send_control(ControlMessage::ApprovalResponse {
                    id,
                    decision: Decision::Deny,
                });
            }
            WireMessage::StepInterrupted { reason } => {
                if let Some(reason) = reason {
                    eprintln!("[interrupted] {reason}");
                }
            }
            WireMessage::StatusUpdate(_) | WireMessage::TodoUpdate(_) => {}
            WireMessage::TurnCompleted => break,
        }
    }
    if printed_any {
        println!();
    }

    match handle.await {
        Ok(pair) => pair,
        Err(e) => panic!("soul task panicked: {e}"),
    }
}
