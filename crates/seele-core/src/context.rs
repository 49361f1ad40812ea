// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use seele_model::Message;

use crate::error::SoulError;

/// In-memory ordered message log with checkpoints.
///
/// `history[0]` is always the system message.  Only the Soul mutates a
/// Context; external readers get a cloned snapshot.  Token accounting is
/// cached per message so a revert costs O(messages dropped), not
/// O(history).
#[derive(Debug)]
pub struct Context {
    history: Vec<Message>,
    /// Cached `approx_tokens` for each entry of `history`.
    per_msg_tokens: Vec<usize>,
    /// Strictly increasing positions into `history`.
    checkpoints: Vec<usize>,
    token_count: usize,
    token_limit: usize,
    compaction_threshold: f32,
}

impl Context {
    pub fn new(system_prompt: impl Into<String>, token_limit: usize, compaction_threshold: f32) -> Self {
        let mut ctx = Self {
            history: Vec::new(),
            per_msg_tokens: Vec::new(),
            checkpoints: Vec::new(),
            token_count: 0,
            token_limit,
            compaction_threshold,
        };
        ctx.push(Message::system(system_prompt));
        ctx
    }

    fn push(&mut self, msg: Message) {
        let tokens = msg.approx_tokens();
        self.token_count += tokens;
        self.per_msg_tokens.push(tokens);
        self.history.push(msg);
    }

    pub fn append(&mut self, msg: Message) {
        self.push(msg);
    }

    pub fn append_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs {
            self.push(m);
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Frozen copy of the history, safe to hand to the model.
    pub fn snapshot(&self) -> Vec<Message> {
        self.history.clone()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Record the current length as a new checkpoint and return its index.
    pub fn checkpoint(&mut self) -> usize {
        self.checkpoints.push(self.history.len());
        self.checkpoints.len() - 1
    }

    pub fn n_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// Truncate history to `checkpoints[k]` and drop checkpoint `k` and all
    /// later ones, leaving `n_checkpoints == k`.
    pub fn revert_to(&mut self, k: usize) -> Result<(), SoulError> {
        if k >= self.checkpoints.len() {
            return Err(SoulError::InvalidCheckpoint {
                index: k,
                available: self.checkpoints.len(),
            });
        }
        let target = self.checkpoints[k];
        let dropped: usize = self.per_msg_tokens[target..].iter().sum();
        self.token_count -= dropped;
        self.history.truncate(target);
        self.per_msg_tokens.truncate(target);
        self.checkpoints.truncate(k);
        Ok(())
    }

    pub fn usage(&self) -> (usize, usize) {
        (self.token_count, self.token_limit)
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn needs_compaction(&self) -> bool {
        if self.token_limit == 0 {
            return false;
        }
        (self.token_count as f32) / (self.token_limit as f32) >= self.compaction_threshold
    }

    /// Replace history with `[system, summary, tail..]` and drop every
    /// checkpoint.  Called only after the summarizer succeeded; a failed
    /// compaction leaves the Context untouched.
    pub fn apply_compacted(&mut self, summary: Message, tail: Vec<Message>) {
        let system = self.history[0].clone();
        self.history.clear();
        self.per_msg_tokens.clear();
        self.checkpoints.clear();
        self.token_count = 0;
        self.push(system);
        self.push(summary);
        self.append_many(tail);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
