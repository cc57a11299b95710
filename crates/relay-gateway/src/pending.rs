//! Component D: Pending-Request Registry.
//!
//! Map from correlation-id to a waiter (response sink + metadata +
//! deadline). Per-type dispatch on inbound messages; a sweeper
//! catches orphans the owning request's own deadline missed (spec.md
//! §4.D).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use relay_core::{CorrelationId, RelayMessage, ReplyKind, WorldId};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

/// The sweeper removes any waiter older than this with no reply
/// (spec.md §4.D).
pub const ORPHAN_AGE: Duration = Duration::from_secs(30);

/// How often the orphan sweeper runs (spec.md §4.D).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// What a waiter resolves to.
#[derive(Debug)]
pub enum WaiterOutcome {
    /// A matching reply arrived.
    Reply(RelayMessage),
    /// The request failed before a reply could arrive (e.g. the
    /// outbound send itself failed).
    Failed {
        /// HTTP status to respond with.
        status: u16,
        /// JSON error body.
        body: Value,
    },
}

/// A secondary match key beyond `kind`, e.g. `("uuid", "abc-123")`
/// for macro execution replies (spec.md §4.D).
pub type SecondaryKey = (String, String);

struct Waiter {
    sink: oneshot::Sender<WaiterOutcome>,
    kind: ReplyKind,
    #[allow(dead_code)]
    world_id: WorldId,
    created_at: Instant,
    secondary_key: Option<SecondaryKey>,
}

/// Registry of in-flight request/response correlations.
#[derive(Default)]
pub struct PendingRegistry {
    waiters: DashMap<String, Waiter>,
}

impl PendingRegistry {
    /// Build an empty registry and spawn its sweeper.
    #[must_use]
    pub fn spawn() -> Arc<Self> {
        let registry = Arc::new(Self::default());
        tokio::spawn(run_sweep_loop(registry.clone()));
        registry
    }

    /// Register a waiter for `corr_id`. Must happen before the
    /// outbound send that carries it, so a reply can never race
    /// ahead of its own registration (spec.md §5).
    pub fn register(
        &self,
        corr_id: &CorrelationId,
        kind: ReplyKind,
        world_id: WorldId,
        secondary_key: Option<SecondaryKey>,
    ) -> oneshot::Receiver<WaiterOutcome> {
        let (sink, receiver) = oneshot::channel();
        self.waiters.insert(
            corr_id.as_str().to_string(),
            Waiter { sink, kind, world_id, created_at: Instant::now(), secondary_key },
        );
        receiver
    }

    /// Dispatch an inbound reply believed to be of `expected_kind`.
    ///
    /// Returns `true` if a waiter was found and completed. A mismatch
    /// on `kind` or the secondary key is dropped and logged at warn
    /// (spec.md §4.D); a second reply for an already-completed
    /// correlation id is dropped silently (idempotence, spec.md §8
    /// invariant 1).
    pub fn fulfill(&self, expected_kind: ReplyKind, message: RelayMessage) -> bool {
        let Some(corr_id) = message.request_id.clone() else {
            warn!(kind = ?expected_kind, "reply carried no correlation id, dropping");
            return false;
        };

        let is_match = match self.waiters.get(corr_id.as_str()) {
            Some(waiter) => {
                if waiter.kind != expected_kind {
                    warn!(corr_id = %corr_id, expected = ?expected_kind, actual = ?waiter.kind, "reply kind mismatch, dropping");
                    false
                } else if let Some((field, expected_value)) = &waiter.secondary_key {
                    let actual = message.payload.get(field).and_then(Value::as_str);
                    if actual != Some(expected_value.as_str()) {
                        warn!(corr_id = %corr_id, field = %field, "reply secondary-key mismatch, dropping");
                        false
                    } else {
                        true
                    }
                } else {
                    true
                }
            },
            // Already fulfilled, expired, or never registered on this replica.
            None => return false,
        };

        if !is_match {
            return false;
        }

        // Re-check under removal: only a confirmed kind/secondary-key
        // match ever evicts the waiter, so a stray mismatched reply
        // leaves the real waiter in place for its actual reply.
        let Some((_, waiter)) = self.waiters.remove(corr_id.as_str()) else {
            return false;
        };
        let _ = waiter.sink.send(WaiterOutcome::Reply(message));
        true
    }

    /// Fail a pending request explicitly (e.g. outbound send failed).
    pub fn fail(&self, corr_id: &CorrelationId, status: u16, body: Value) {
        if let Some((_, waiter)) = self.waiters.remove(corr_id.as_str()) {
            let _ = waiter.sink.send(WaiterOutcome::Failed { status, body });
        }
    }

    /// Remove a waiter without completing it (e.g. the caller's own
    /// deadline timer fired first).
    pub fn cancel(&self, corr_id: &CorrelationId) {
        self.waiters.remove(corr_id.as_str());
    }

    /// Number of in-flight waiters. Exposed for tests and health
    /// reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// `true` if there are no in-flight waiters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn sweep_orphans(&self) {
        let orphans: Vec<String> = self
            .waiters
            .iter()
            .filter(|entry| entry.value().created_at.elapsed() > ORPHAN_AGE)
            .map(|entry| entry.key().clone())
            .collect();
        for corr_id in orphans {
            warn!(corr_id = %corr_id, "sweeping orphaned pending request");
            self.waiters.remove(&corr_id);
        }
    }
}

async fn run_sweep_loop(registry: Arc<PendingRegistry>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        registry.sweep_orphans();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corr(s: &str) -> CorrelationId {
        CorrelationId(s.to_string())
    }

    #[tokio::test]
    async fn fulfill_completes_matching_waiter() {
        let registry = PendingRegistry::default();
        let id = corr("search_1_abc");
        let rx = registry.register(&id, ReplyKind::Search, WorldId::from("w1"), None);

        let reply = RelayMessage {
            kind: "search".into(),
            request_id: Some(id),
            payload: serde_json::json!({"results": []}),
        };
        assert!(registry.fulfill(ReplyKind::Search, reply));

        match rx.await.unwrap() {
            WaiterOutcome::Reply(m) => assert_eq!(m.kind, "search"),
            WaiterOutcome::Failed { .. } => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn second_reply_for_same_correlation_id_is_dropped() {
        let registry = PendingRegistry::default();
        let id = corr("search_1_abc");
        let _rx = registry.register(&id, ReplyKind::Search, WorldId::from("w1"), None);

        let reply = |id: CorrelationId| RelayMessage { kind: "search".into(), request_id: Some(id), payload: serde_json::json!({}) };
        assert!(registry.fulfill(ReplyKind::Search, reply(id.clone())));
        assert!(!registry.fulfill(ReplyKind::Search, reply(id)));
    }

    #[tokio::test]
    async fn kind_mismatch_is_dropped_and_waiter_remains() {
        let registry = PendingRegistry::default();
        let id = corr("search_1_abc");
        let _rx = registry.register(&id, ReplyKind::Search, WorldId::from("w1"), None);

        let reply = RelayMessage { kind: "entity".into(), request_id: Some(id.clone()), payload: serde_json::json!({}) };
        assert!(!registry.fulfill(ReplyKind::Entity, reply));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn secondary_key_mismatch_is_dropped() {
        let registry = PendingRegistry::default();
        let id = corr("macro-execute_1_abc");
        let _rx = registry.register(
            &id,
            ReplyKind::MacroExecute,
            WorldId::from("w1"),
            Some(("uuid".to_string(), "expected-uuid".to_string())),
        );

        let reply = RelayMessage {
            kind: "macro-execute".into(),
            request_id: Some(id),
            payload: serde_json::json!({"uuid": "wrong-uuid"}),
        };
        assert!(!registry.fulfill(ReplyKind::MacroExecute, reply));
    }

    #[tokio::test]
    async fn cancel_removes_waiter_without_completing() {
        let registry = PendingRegistry::default();
        let id = corr("search_1_abc");
        let rx = registry.register(&id, ReplyKind::Search, WorldId::from("w1"), None);
        registry.cancel(&id);
        assert!(registry.is_empty());
        drop(rx);
    }
}
