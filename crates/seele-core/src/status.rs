// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// What the Soul is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Generating,
    ToolRunning,
    Compacting,
    Reverting,
}

/// Point-in-time picture of runtime-visible state, emitted over the Wire.
///
/// Later snapshots supersede earlier ones; UIs may coalesce and keep only
/// the latest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub context_tokens: usize,
    pub context_limit: usize,
    pub step: u32,
    pub phase: Phase,
    pub pending_tool_calls: usize,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serialises_with_stable_field_names() {
        let s = StatusSnapshot {
            context_tokens: 10,
            context_limit: 100,
            step: 2,
            phase: Phase::ToolRunning,
            pending_tool_calls: 3,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["context_tokens"], 10);
        assert_eq!(json["context_limit"], 100);
        assert_eq!(json["step"], 2);
        assert_eq!(json["phase"], "tool_running");
        assert_eq!(json["pending_tool_calls"], 3);
    }

    #[test]
    fn phase_round_trips() {
        for p in [
            Phase::Idle,
            Phase::Generating,
            Phase::ToolRunning,
            Phase::Compacting,
            Phase::Reverting,
        ] {
            let json = serde_json::to_string(&p).unwrap();
            let back: Phase = serde_json::from_str(&json).unwrap();
            assert_eq!(back, p);
        }
    }
}
