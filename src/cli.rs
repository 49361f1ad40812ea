// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// UI frontend for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UiKind {
    /// Stream plain text to stdout; non-interactive.  Dangerous tool calls
    /// are auto-denied unless --yolo is set.
    Print,
    /// Interactive line-based shell with approval prompts.
    #[default]
    Shell,
}

#[derive(Parser, Debug)]
#[command(
    name = "seele",
    about = "An interactive AI coding agent with a checkpointed, time-travelling context",
    version,
    long_about = None,
)]
pub struct Cli {
    /// Run one request non-interactively and exit
    #[arg(long, short = 'c', value_name = "TEXT")]
    pub command: Option<String>,

    /// Resume a previous session by id
    #[arg(long, value_name = "ID")]
    pub resume: Option<String>,

    /// List saved sessions and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// UI frontend
    #[arg(long, value_enum, default_value = "shell")]
    pub ui: UiKind,

    /// Explicit config file (also honoured via SEELE_CONFIG)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model override: "<provider>/<model>" or just "<model>"
    #[arg(long, short = 'm', value_name = "MODEL")]
    pub model: Option<String>,

    /// Auto-approve every tool call without asking (dangerous)
    #[arg(long)]
    pub yolo: bool,

    /// Log to stderr; filter with the SEELE_LOG environment variable
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
