// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use seele_tools::{ApprovalGate, ApprovalWaitAborted, Decision};

use crate::wire::{DangerLevel, WireMessage};

/// Persistable view of the caches, written to `approvals.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub always_allowed: Vec<String>,
    pub decisions: Vec<(String, String, Decision)>,
}

/// User-in-the-loop gate for dangerous tool calls.
///
/// Emits [`WireMessage::ApprovalRequest`] and waits for the matching
/// response, routed in by the Soul's control task via [`Approval::resolve`].
/// Allows are cached for the session: `allow_always` per tool name,
/// `allow_once` per `(tool, argument digest)`.  A deny answers one call and
/// is never cached, so the next identical call asks again.
pub struct Approval {
    wire_tx: mpsc::UnboundedSender<WireMessage>,
    pending: Mutex<HashMap<String, oneshot::Sender<Decision>>>,
    decisions: Mutex<HashMap<(String, String), Decision>>,
    always_allowed: Mutex<HashSet<String>>,
    yolo: AtomicBool,
    /// Cancelling this token aborts every in-flight wait.  Replaced by the
    /// Soul at the start of each run.
    cancel: Mutex<CancellationToken>,
}

impl Approval {
    pub fn new(wire_tx: mpsc::UnboundedSender<WireMessage>) -> Self {
        Self {
            wire_tx,
            pending: Mutex::new(HashMap::new()),
            decisions: Mutex::new(HashMap::new()),
            always_allowed: Mutex::new(HashSet::new()),
            yolo: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn set_yolo(&self, on: bool) {
        self.yolo.store(on, Ordering::Relaxed);
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo.load(Ordering::Relaxed)
    }

    /// Install the cancellation token for the current run.
    pub fn set_cancel_token(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap() = token;
    }

    /// Route an [`ApprovalResponse`] to the request waiting on `id`.
    /// Unknown ids are ignored (stale responses after cancellation).
    pub fn resolve(&self, id: &str, decision: Decision) {
        if let Some(tx) = self.pending.lock().unwrap().remove(id) {
            let _ = tx.send(decision);
        }
    }

    pub fn snapshot(&self) -> ApprovalSnapshot {
        let mut always: Vec<String> = self
            .always_allowed
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        always.sort();
        let mut decisions: Vec<(String, String, Decision)> = self
            .decisions
            .lock()
            .unwrap()
            .iter()
            .map(|((tool, digest), d)| (tool.clone(), digest.clone(), *d))
            .collect();
        decisions.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        ApprovalSnapshot {
            always_allowed: always,
            decisions,
        }
    }

    pub fn restore(&self, snapshot: ApprovalSnapshot) {
        *self.always_allowed.lock().unwrap() = snapshot.always_allowed.into_iter().collect();
        *self.decisions.lock().unwrap() = snapshot
            .decisions
            .into_iter()
            .map(|(tool, digest, d)| ((tool, digest), d))
            .collect();
    }

    fn cached(&self, tool_name: &str, digest: &str) -> Option<Decision> {
        if self.always_allowed.lock().unwrap().contains(tool_name) {
            return Some(Decision::AllowAlways);
        }
        self.decisions
            .lock()
            .unwrap()
            .get(&(tool_name.to_string(), digest.to_string()))
            .copied()
    }

    fn record(&self, tool_name: &str, digest: &str, decision: Decision) {
        match decision {
            Decision::AllowAlways => {
                self.always_allowed
                    .lock()
                    .unwrap()
                    .insert(tool_name.to_string());
            }
            Decision::AllowOnce => {
                self.decisions
                    .lock()
                    .unwrap()
                    .insert((tool_name.to_string(), digest.to_string()), decision);
            }
            // Denies are not cached; `decisions` only ever holds allows.
            Decision::Deny => {}
        }
    }
}

#[async_trait]
impl ApprovalGate for Approval {
    async fn request(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Result<Decision, ApprovalWaitAborted> {
        if self.is_yolo() {
            return Ok(Decision::AllowOnce);
        }
        let digest = canonical_digest(args);
        if let Some(d) = self.cached(tool_name, &digest) {
            debug!(tool = tool_name, "approval served from cache");
            return Ok(d);
        }

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);
        let _ = self.wire_tx.send(WireMessage::ApprovalRequest {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            arguments: args.clone(),
            danger_level: DangerLevel::Dangerous,
        });

        let cancel = self.cancel.lock().unwrap().clone();
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.lock().unwrap().remove(&id);
                return Err(ApprovalWaitAborted);
            }
            res = rx => res.map_err(|_| ApprovalWaitAborted)?,
        };

        self.record(tool_name, &digest, decision);
        Ok(decision)
    }
}

/// SHA-256 over a canonical rendering of `args` (object keys sorted at every
/// level), so logically identical argument objects share one digest.
pub fn canonical_digest(args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(args));
    hex::encode(hasher.finalize())
}

fn canonical_json(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner = keys
                .iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical_json(&map[*k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{inner}}}")
        }
        Value::Array(items) => {
            let inner = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{inner}]")
        }
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn approval() -> (Approval, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Approval::new(tx), rx)
    }

    /// Spawn a responder that answers the next ApprovalRequest with `d`.
    fn respond_with(
        approval: &std::sync::Arc<Approval>,
        mut rx: mpsc::UnboundedReceiver<WireMessage>,
        d: Decision,
    ) {
        let approval = std::sync::Arc::clone(approval);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let WireMessage::ApprovalRequest { id, .. } = msg {
                    approval.resolve(&id, d);
                    break;
                }
            }
        });
    }

    #[test]
    fn digest_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_digest(&a), canonical_digest(&b));
    }

    #[test]
    fn digest_distinguishes_values() {
        assert_ne!(
            canonical_digest(&json!({"cmd": "ls"})),
            canonical_digest(&json!({"cmd": "rm"}))
        );
    }

    #[tokio::test]
    async fn yolo_skips_request_entirely() {
        let (a, mut rx) = approval();
        a.set_yolo(true);
        let d = a.request("shell", &json!({"cmd": "ls"})).await.unwrap();
        assert_eq!(d, Decision::AllowOnce);
        assert!(rx.try_recv().is_err(), "no request should be emitted");
    }

    #[tokio::test]
    async fn allow_once_is_cached_per_digest() {
        let (a, rx) = approval();
        let a = std::sync::Arc::new(a);
        respond_with(&a, rx, Decision::AllowOnce);

        let args = json!({"cmd": "ls"});
        assert_eq!(a.request("shell", &args).await.unwrap(), Decision::AllowOnce);
        // Second identical call is served from cache (responder already done).
        assert_eq!(a.request("shell", &args).await.unwrap(), Decision::AllowOnce);
    }

    #[tokio::test]
    async fn allow_always_covers_other_arguments() {
        let (a, rx) = approval();
        let a = std::sync::Arc::new(a);
        respond_with(&a, rx, Decision::AllowAlways);

        assert_eq!(
            a.request("shell", &json!({"cmd": "ls"})).await.unwrap(),
            Decision::AllowAlways
        );
        // Different args, same tool: idempotent allow without a new request.
        assert_eq!(
            a.request("shell", &json!({"cmd": "pwd"})).await.unwrap(),
            Decision::AllowAlways
        );
    }

    #[tokio::test]
    async fn deny_is_returned_but_never_cached() {
        let (a, rx) = approval();
        let a = std::sync::Arc::new(a);
        respond_with(&a, rx, Decision::Deny);
        assert_eq!(
            a.request("shell", &json!({"cmd": "rm -rf /"})).await.unwrap(),
            Decision::Deny
        );
        assert!(a.cached("shell", &canonical_digest(&json!({"cmd": "rm -rf /"}))).is_none());
        let snap = a.snapshot();
        assert!(snap.decisions.is_empty());
        assert!(snap.always_allowed.is_empty());
    }

    #[tokio::test]
    async fn cancel_token_aborts_wait() {
        let (a, _rx) = approval();
        let token = CancellationToken::new();
        a.set_cancel_token(token.clone());
        token.cancel();
        let err = a.request("shell", &json!({})).await;
        assert!(err.is_err());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let (a, _rx) = approval();
        a.record("shell", "digest1", Decision::AllowOnce);
        a.record("shell", "x", Decision::AllowAlways);
        let snap = a.snapshot();

        let (b, _rx2) = approval();
        b.restore(snap);
        assert!(b.cached("shell", "digest1").is_some());
        assert!(b.cached("shell", "anything").is_some(), "always_allowed applies");
    }
}
