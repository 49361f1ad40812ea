// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable, append-only record of one conversation.
//!
//! On-disk layout, one directory per session:
//!
//! ```text
//! <sessions_dir>/<session_id>/
//!   header.json       # id, title, model, created_at, cwd
//!   messages.jsonl    # one record per line, append-only
//!   approvals.json    # approval cache snapshot, rewritten atomically
//! ```
//!
//! A revert is recorded as a tombstone line `{"tombstone_from": n}`: replay
//! drops entries with index >= n, then applies subsequent appends.  This
//! keeps the log strictly append-only.  A truncated trailing line (crash
//! mid-append) ends replay at the last complete record.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use seele_model::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub cwd: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LogRecord {
    Tombstone { tombstone_from: usize },
    Message(Message),
}

/// Root directory holding all sessions.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the sessions directory: `SEELE_SESSIONS_DIR`, then the
    /// configured path, then the platform data dir.
    pub fn resolve_root(configured: Option<&Path>) -> PathBuf {
        if let Ok(dir) = std::env::var("SEELE_SESSIONS_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        if let Some(dir) = configured {
            return dir.to_path_buf();
        }
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("seele/sessions")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a new session and write its header.
    pub fn create(&self, model: &str, cwd: &Path) -> anyhow::Result<Session> {
        let meta = SessionMeta {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            model: model.to_string(),
            created_at: Utc::now(),
            cwd: cwd.to_path_buf(),
        };
        let dir = self.root.join(&meta.id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating session dir {}", dir.display()))?;
        write_header(&dir, &meta)?;
        let log = open_log(&dir)?;
        debug!(session = %meta.id, "created session");
        Ok(Session {
            meta,
            dir,
            log,
            next_index: 0,
            _tempdir: None,
        })
    }

    /// Enumerate sessions, newest first.
    pub fn list(&self) -> anyhow::Result<Vec<SessionMeta>> {
        let mut sessions = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return Ok(sessions),
        };
        for entry in entries.flatten() {
            let header = entry.path().join("header.json");
            let Ok(text) = std::fs::read_to_string(&header) else {
                continue;
            };
            match serde_json::from_str::<SessionMeta>(&text) {
                Ok(meta) => sessions.push(meta),
                Err(e) => warn!(path = %header.display(), "skipping unreadable header: {e}"),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Reopen a session and replay its message log.
    pub fn resume(&self, id: &str) -> anyhow::Result<(Session, Vec<Message>)> {
        let dir = self.root.join(id);
        let text = std::fs::read_to_string(dir.join("header.json"))
            .with_context(|| format!("no session {id}"))?;
        let meta: SessionMeta = serde_json::from_str(&text)
            .with_context(|| format!("corrupt header for session {id}"))?;

        let history = replay_log(&dir.join("messages.jsonl"));
        let next_index = history.len();
        let log = open_log(&dir)?;
        debug!(session = %meta.id, messages = history.len(), "resumed session");
        Ok((
            Session {
                meta,
                dir,
                log,
                next_index,
                _tempdir: None,
            },
            history,
        ))
    }
}

fn open_log(dir: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("messages.jsonl"))
        .with_context(|| format!("opening message log in {}", dir.display()))
}

fn write_header(dir: &Path, meta: &SessionMeta) -> anyhow::Result<()> {
    let tmp = dir.join("header.json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(meta)?)?;
    std::fs::rename(&tmp, dir.join("header.json"))?;
    Ok(())
}

/// Replay the log, honouring tombstones and stopping at the first record
/// that does not parse (truncated tail after a crash).
fn replay_log(path: &Path) -> Vec<Message> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let mut history: Vec<Message> = Vec::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord>(&line) {
            Ok(LogRecord::Message(m)) => history.push(m),
            Ok(LogRecord::Tombstone { tombstone_from }) => {
                history.truncate(tombstone_from);
            }
            Err(e) => {
                warn!("message log ends with incomplete record: {e}");
                break;
            }
        }
    }
    history
}

/// One open session.  The log file is owned exclusively for the session's
/// lifetime; appends are serialized through `&mut self`.
pub struct Session {
    meta: SessionMeta,
    dir: PathBuf,
    log: File,
    /// Index the next appended message will occupy in the logical log
    /// (after tombstone resolution).
    next_index: usize,
    /// Keeps an ephemeral session's backing directory alive; the directory
    /// and everything in it are removed from disk when the session drops.
    _tempdir: Option<tempfile::TempDir>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Number of live messages in the logical log.
    pub fn len(&self) -> usize {
        self.next_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// A throwaway session for sub-agents, backed by a self-deleting temp
    /// directory.  Nothing survives the session's drop.
    pub fn ephemeral() -> anyhow::Result<Session> {
        let tempdir = tempfile::tempdir().context("creating ephemeral session dir")?;
        let store = SessionStore::open(tempdir.path());
        let mut session = store.create("ephemeral", tempdir.path())?;
        session._tempdir = Some(tempdir);
        Ok(session)
    }

    /// Durable append: the record is flushed and fsynced before this
    /// returns, so an acknowledged message survives a crash.
    pub fn append(&mut self, msg: &Message) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&LogRecord::Message(msg.clone()))?;
        line.push('\n');
        self.log.write_all(line.as_bytes())?;
        self.log.flush()?;
        self.log.sync_data()?;
        self.next_index += 1;
        Ok(())
    }

    /// Record that entries with index >= `from` are dead (a revert).
    pub fn tombstone(&mut self, from: usize) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&LogRecord::Tombstone { tombstone_from: from })?;
        line.push('\n');
        self.log.write_all(line.as_bytes())?;
        self.log.flush()?;
        self.log.sync_data()?;
        self.next_index = from;
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> anyhow::Result<()> {
        self.meta.title = title.into();
        write_header(&self.dir, &self.meta)
    }

    /// Atomically rewrite the approval cache snapshot.
    pub fn save_approvals<T: Serialize>(&self, snapshot: &T) -> anyhow::Result<()> {
        let tmp = self.dir.join("approvals.json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, self.dir.join("approvals.json"))?;
        Ok(())
    }

    pub fn load_approvals<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        let text = std::fs::read_to_string(self.dir.join("approvals.json")).ok()?;
        serde_json::from_str(&text).ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
