// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;

use thiserror::Error;

use seele_model::{Capability, ProviderError};

/// Fatal failures of one user turn.
///
/// Tool failures never appear here — they surface as tool-role messages so
/// the model can react.  Everything below aborts the turn; nothing crashes
/// the process.
#[derive(Debug, Error)]
pub enum SoulError {
    /// Retry-eligible transport failure that outlived the retry budget.
    #[error("model transport failure: {0}")]
    LlmTransient(String),

    /// Auth, model-not-found, or request schema mismatch.
    #[error("model request rejected: {0}")]
    LlmPermanent(String),

    /// The conversation needs capabilities the model does not have.
    #[error("model lacks required capabilities: {}", format_caps(.missing))]
    LlmNotSupported { missing: BTreeSet<Capability> },

    /// Compaction failed; the context cannot shrink below the limit.
    #[error("context overflow: {0}")]
    ContextOverflow(String),

    /// The step budget for one turn ran out.
    #[error("maximum steps reached ({0})")]
    MaxStepsReached(u32),

    /// A revert targeted a checkpoint that does not exist.
    #[error("invalid checkpoint {index}: only {available} recorded")]
    InvalidCheckpoint { index: usize, available: usize },

    /// User-initiated stop.  Graceful; not logged as a failure.
    #[error("cancelled")]
    Cancelled,

    /// The durable session log could not be written.
    #[error("session write failed: {0}")]
    SessionIo(String),
}

fn format_caps(missing: &BTreeSet<Capability>) -> String {
    missing
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ProviderError> for SoulError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(m) => SoulError::LlmTransient(m),
            ProviderError::Auth(m) | ProviderError::Schema(m) => SoulError::LlmPermanent(m),
            ProviderError::Cancelled => SoulError::Cancelled,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_transient_maps_to_llm_transient() {
        let e: SoulError = ProviderError::Transient("reset".into()).into();
        assert!(matches!(e, SoulError::LlmTransient(_)));
    }

    #[test]
    fn provider_auth_and_schema_map_to_permanent() {
        let a: SoulError = ProviderError::Auth("401".into()).into();
        let s: SoulError = ProviderError::Schema("400".into()).into();
        assert!(matches!(a, SoulError::LlmPermanent(_)));
        assert!(matches!(s, SoulError::LlmPermanent(_)));
    }

    #[test]
    fn not_supported_lists_capabilities_in_order() {
        let missing: BTreeSet<Capability> =
            [Capability::Image, Capability::Think].into_iter().collect();
        let e = SoulError::LlmNotSupported { missing };
        let text = e.to_string();
        assert!(text.contains("think"));
        assert!(text.contains("image"));
    }
}
