// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, UiKind};
use seele_config::Config;
use seele_core::{
    system_prompt, Approval, ApprovalSnapshot, Context, DenwaRenji, Runtime, SendDmailTool,
    SessionStore, Soul, SoulError, TaskTool, UiSide,
};
use seele_tools::{
    EditFileTool, GrepTool, ListDirTool, ReadFileTool, SetTodoListTool, ShellTool, Toolset,
    WriteFileTool,
};

const EXIT_OK: u8 = 0;
const EXIT_USER: u8 = 1;
const EXIT_PROVIDER: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("seele: {e:#}");
            ExitCode::from(EXIT_PROVIDER)
        }
    }
}

/// Tracing goes to stderr, filtered by SEELE_LOG.  The interactive shell
/// stays quiet unless the caller opts in with --verbose.
fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "off" };
    let filter = EnvFilter::try_from_env("SEELE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = seele_config::load(cli.config.as_deref())?;
    apply_model_override(&mut config, cli.model.as_deref());

    let store = SessionStore::open(SessionStore::resolve_root(config.sessions_dir.as_deref()));

    if cli.list_sessions {
        return list_sessions(&store);
    }

    let (soul, ui_side) = match build_soul(&cli, &config, &store) {
        Ok(pair) => pair,
        Err(BuildError::UnknownSession(id)) => {
            eprintln!("seele: no session with id {id}");
            return Ok(EXIT_USER);
        }
        Err(BuildError::Other(e)) => return Err(e),
    };

    match (cli.command, cli.ui) {
        (Some(text), _) => {
            let (soul, result) = ui::print::run_print(soul, ui_side, text).await;
            save_approvals(&soul);
            match result {
                Ok(_) => Ok(EXIT_OK),
                Err(e) => {
                    eprintln!("seele: {e}");
                    Ok(exit_code_for(&e))
                }
            }
        }
        (None, UiKind::Print) => {
            eprintln!("seele: --ui print requires -c/--command");
            Ok(EXIT_USER)
        }
        (None, UiKind::Shell) => ui::shell::run_shell(soul, ui_side).await,
    }
}

fn list_sessions(store: &SessionStore) -> anyhow::Result<u8> {
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("no sessions in {}", store.root().display());
        return Ok(EXIT_OK);
    }
    for meta in sessions {
        let title = if meta.title.is_empty() {
            "(untitled)"
        } else {
            &meta.title
        };
        println!(
            "{}  {}  {}  {}",
            meta.id,
            meta.created_at.format("%Y-%m-%d %H:%M"),
            meta.model,
            title
        );
    }
    Ok(EXIT_OK)
}

/// `--model openrouter/foo` switches provider and model; a bare name keeps
/// the configured provider.
fn apply_model_override(config: &mut Config, over: Option<&str>) {
    let Some(over) = over else { return };
    match over.split_once('/') {
        Some((provider, name)) => {
            config.model.provider = provider.to_string();
            config.model.name = name.to_string();
        }
        None => config.model.name = over.to_string(),
    }
}

enum BuildError {
    UnknownSession(String),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for BuildError {
    fn from(e: anyhow::Error) -> Self {
        BuildError::Other(e)
    }
}

fn build_soul(cli: &Cli, config: &Config, store: &SessionStore) -> Result<(Soul, UiSide), BuildError> {
    let provider = seele_model::from_config(&config.model)
        .context("failed to initialise model provider")?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let (session, history) = match &cli.resume {
        Some(id) => match store.resume(id) {
            Ok(pair) => pair,
            Err(_) => return Err(BuildError::UnknownSession(id.clone())),
        },
        None => (
            store
                .create(&config.model.name, &cwd)
                .context("failed to create session")?,
            Vec::new(),
        ),
    };

    let (soul_side, ui_side) = seele_core::wire::channel();
    let approval = Arc::new(Approval::new(soul_side.sender()));
    if cli.yolo || config.tools.yolo {
        approval.set_yolo(true);
    }
    if let Some(snapshot) = session.load_approvals::<ApprovalSnapshot>() {
        approval.restore(snapshot);
    }

    let denwa = Arc::new(DenwaRenji::new());
    let toolset = build_toolset(config, &provider, &denwa);

    let mut context = Context::new(
        system_prompt(&cwd, None, true),
        config.model.context_window,
        config.soul.compaction_threshold,
    );
    // Resumed history replays into a fresh context; checkpoints never cross
    // session boundaries.
    context.append_many(history);

    let runtime = Runtime {
        provider,
        max_steps: config.soul.max_steps,
        max_retries: config.soul.max_retries,
        approval,
        denwa_renji: denwa,
        cwd,
    };
    let soul = Soul::new(runtime, Arc::new(toolset), context, session, soul_side);
    Ok((soul, ui_side))
}

fn build_toolset(
    config: &Config,
    provider: &Arc<dyn seele_model::ChatProvider>,
    denwa: &Arc<DenwaRenji>,
) -> Toolset {
    let mut tools = Toolset::new();
    tools.register(ReadFileTool);
    tools.register(ListDirTool);
    tools.register(GrepTool);
    tools.register(WriteFileTool);
    tools.register(EditFileTool);
    tools.register(ShellTool {
        timeout_secs: config.tools.shell_timeout_secs,
    });
    tools.register(SetTodoListTool);
    tools.register(SendDmailTool::new(Arc::clone(denwa)));
    tools.register(TaskTool::new(
        Arc::clone(provider),
        config.model.context_window,
        Arc::new(AtomicUsize::new(0)),
    ));
    tools
}

pub(crate) fn save_approvals(soul: &Soul) {
    let snapshot = soul.runtime().approval.snapshot();
    if let Err(e) = soul.session().save_approvals(&snapshot) {
        tracing::warn!("failed to persist approval cache: {e}");
    }
}

pub(crate) fn exit_code_for(e: &SoulError) -> u8 {
    match e {
        SoulError::Cancelled => EXIT_CANCELLED,
        SoulError::LlmTransient(_)
        | SoulError::LlmPermanent(_)
        | SoulError::LlmNotSupported { .. } => EXIT_PROVIDER,
        _ => EXIT_USER,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_override_with_provider() {
        let mut cfg = Config::default();
        apply_model_override(&mut cfg, Some("openrouter/some-model"));
        assert_eq!(cfg.model.provider, "openrouter");
        assert_eq!(cfg.model.name, "some-model");
    }

    #[test]
    fn model_override_bare_name_keeps_provider() {
        let mut cfg = Config::default();
        let provider = cfg.model.provider.clone();
        apply_model_override(&mut cfg, Some("other-model"));
        assert_eq!(cfg.model.provider, provider);
        assert_eq!(cfg.model.name, "other-model");
    }

    #[test]
    fn cancelled_maps_to_130() {
        assert_eq!(exit_code_for(&SoulError::Cancelled), 130);
    }

    #[test]
    fn provider_errors_map_to_2() {
        assert_eq!(exit_code_for(&SoulError::LlmPermanent("x".into())), 2);
        assert_eq!(exit_code_for(&SoulError::LlmTransient("x".into())), 2);
    }

    #[test]
    fn other_errors_map_to_1() {
        assert_eq!(exit_code_for(&SoulError::MaxStepsReached(5)), 1);
        assert_eq!(exit_code_for(&SoulError::SessionIo("disk".into())), 1);
    }
}
