// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Interactive line-based frontend.
//!
//! Streams assistant text to stdout, tool activity to stderr, prompts for
//! approvals inline, and turns Ctrl-C into a Wire cancel for the in-flight
//! turn.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use seele_core::{ControlMessage, Soul, SoulError, TurnOutcome, UiSide, WireMessage};
use seele_model::ContentPart;
use seele_tools::Decision;

pub async fn run_shell(mut soul: Soul, mut ui: UiSide) -> anyhow::Result<u8> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!(
        "seele — session {} — type a request, \"exit\" to quit",
        soul.session().id()
    );

    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let Some(line) = lines.next_line().await? else {
            break; // stdin EOF
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let (returned, result) = run_turn(soul, &mut ui, &mut lines, input).await;
        soul = returned;
        crate::save_approvals(&soul);
        if let Err(e) = result {
            match e {
                SoulError::Cancelled => eprintln!("(cancelled)"),
                other => eprintln!("seele: {other}"),
            }
        }
    }
    Ok(0)
}

async fn run_turn(
    mut soul: Soul,
    ui: &mut UiSide,
    lines: &mut Lines<BufReader<Stdin>>,
    input: String,
) -> (Soul, Result<TurnOutcome, SoulError>) {
    let handle = tokio::spawn(async move {
        let result = soul.run(&input).await;
        (soul, result)
    });

    loop {
        tokio::select! {
            msg = ui.recv() => {
                let Ok(msg) = msg else { break };
                if handle_message(msg, ui, lines).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n(cancelling — Ctrl-C again after the turn ends to quit)");
                ui.send_control(ControlMessage::Cancel);
            }
        }
    }

    match handle.await {
        Ok(pair) => pair,
        Err(e) => panic!("soul task panicked: {e}"),
    }
}

/// Render one wire message.  Returns true when the turn is over.
async fn handle_message(
    msg: WireMessage,
    ui: &UiSide,
    lines: &mut Lines<BufReader<Stdin>>,
) -> bool {
    match msg {
        WireMessage::StreamedMessagePart {
            part: ContentPart::Text { text },
            ..
        } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        WireMessage::StreamedMessagePart { .. } => {}
        WireMessage::ToolCallStarted {
            name,
            argument_preview,
            ..
        } => {
            eprintln!("\n⚙ {name} {argument_preview}");
        }
        WireMessage::ToolCallProgress { text, .. } => {
            eprintln!("  {text}");
        }
        WireMessage::ToolCallCompleted {
            result_summary,
            is_error,
            ..
        } => {
            let marker = if is_error { "✗" } else { "✓" };
            eprintln!("  {marker} {result_summary}");
        }
        WireMessage::ApprovalRequest {
            id,
            tool_name,
            arguments,
            ..
        } => {
            eprintln!("\n{tool_name} wants to run:");
            eprintln!("  {arguments}");
            eprint!("allow? [y]es once / [a]lways / [N]o: ");
            let _ = std::io::stderr().flush();
            let answer = lines.next_line().await.ok().flatten().unwrap_or_default();
            let decision = match answer.trim() {
                "y" | "Y" | "yes" => Decision::AllowOnce,
                "a" | "A" | "always" => Decision::AllowAlways,
                _ => Decision::Deny,
            };
            ui.send_control(ControlMessage::ApprovalResponse { id, decision });
        }
        WireMessage::TodoUpdate(todos) => {
            eprintln!();
            for t in todos {
                let marker = match t.status.as_str() {
                    "completed" => "[x]",
                    "in_progress" => "[~]",
                    _ => "[ ]",
                };
                eprintln!("  {marker} {}", t.content);
            }
        }
        WireMessage::StatusUpdate(_) => {}
        WireMessage::StepInterrupted { reason } => {
            if let Some(reason) = reason {
                eprintln!("\n(interrupted: {reason})");
            }
        }
        WireMessage::TurnCompleted => {
            println!();
            return true;
        }
    }
    false
}
