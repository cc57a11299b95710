//! Component C: Client Registry.
//!
//! Process-local set of [`Connection`]s, indexed by world-id and
//! grouped by owning credential; injects typed message handlers;
//! runs a periodic liveness sweep (spec.md §4.C).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::SinkExt;
use relay_core::{Credential, RelayMessage, WorldId};
use relay_store::CoordinationStore;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::{self, Connection, ConnectionEvent};

/// How often the liveness sweep runs (spec.md §4.C).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Depth of the shared connection-event channel every accepted socket
/// reports into.
const EVENT_CHANNEL_DEPTH: usize = 1024;

/// A handler invoked for inbound messages of one `type`. The first
/// handler registered for a type owns delivery (spec.md §4.C).
pub type MessageHandler = Arc<dyn Fn(WorldId, Credential, RelayMessage) + Send + Sync>;

/// Process-local registry of live world connections.
pub struct ClientRegistry {
    connections: DashMap<WorldId, Connection>,
    credential_groups: DashMap<Credential, HashSet<WorldId>>,
    handlers: DashMap<String, MessageHandler>,
    store: Arc<dyn CoordinationStore>,
    replica_id: String,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl ClientRegistry {
    /// Build a registry and spawn its event-dispatch and sweep tasks.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, replica_id: String) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let registry = Arc::new(Self {
            connections: DashMap::new(),
            credential_groups: DashMap::new(),
            handlers: DashMap::new(),
            store,
            replica_id,
            event_tx,
        });

        tokio::spawn(run_event_loop(registry.clone(), event_rx));
        tokio::spawn(run_sweep_loop(registry.clone()));

        registry
    }

    /// Register the handler that owns delivery for inbound messages
    /// of `type_name`. A later call for the same type is ignored —
    /// the first registration wins (spec.md §4.C).
    pub fn on_message(&self, type_name: impl Into<String>, handler: MessageHandler) {
        self.handlers.entry(type_name.into()).or_insert(handler);
    }

    /// Accept a newly-upgraded socket as `world_id`/`credential`.
    ///
    /// Returns `None` if a live connection already owns `world_id`,
    /// having already closed the new upgrade with
    /// [`connection::CLOSE_DUPLICATE_CONNECTION`]; a dead entry is
    /// evicted first. On success, best-effort mirrors the mapping
    /// into the coordination store (failures logged, not fatal —
    /// spec.md §4.C).
    pub async fn add(
        &self,
        mut socket: axum::extract::ws::WebSocket,
        world_id: WorldId,
        credential: Credential,
    ) -> Option<Connection> {
        if let Some(existing) = self.connections.get(&world_id) {
            if existing.is_alive() {
                let frame = axum::extract::ws::CloseFrame {
                    code: connection::CLOSE_DUPLICATE_CONNECTION,
                    reason: "world already connected elsewhere".into(),
                };
                let _ = socket.send(axum::extract::ws::Message::Close(Some(frame))).await;
                return None;
            }
        }
        self.connections.remove(&world_id);

        let connection = Connection::accept(socket, world_id.clone(), credential.clone(), self.event_tx.clone());
        self.connections.insert(world_id.clone(), connection.clone());
        self.credential_groups.entry(credential.clone()).or_default().insert(world_id.clone());

        self.mirror_to_store(&world_id, &credential).await;

        Some(connection)
    }

    async fn mirror_to_store(&self, world_id: &WorldId, credential: &Credential) {
        let now = chrono::Utc::now().to_rfc3339();
        let results = futures::future::join4(
            self.store.set(&format!("client:{}:instance", world_id.as_str()), &self.replica_id, Duration::from_secs(3600)),
            self.store.sadd(&format!("apikey:{}:clients", credential.as_str()), world_id.as_str()),
            self.store.hset(&format!("client:{}:connectedSince", world_id.as_str()), "value", &now),
            self.store.set(&format!("apikey:{}:instance", credential.as_str()), &self.replica_id, Duration::from_secs(3600)),
        )
        .await;
        if results.0.is_err() || results.1.is_err() || results.2.is_err() || results.3.is_err() {
            warn!(world_id = %world_id, "failed to mirror connection into coordination store");
        }
    }

    /// Remove `world_id` from the registry (local state only; a
    /// caller who also wants the coordination store cleared should
    /// do so separately, e.g. on graceful shutdown).
    pub fn remove(&self, world_id: &WorldId) {
        if let Some((_, connection)) = self.connections.remove(world_id) {
            let credential = connection.credential().clone();
            if let Some(mut group) = self.credential_groups.get_mut(&credential) {
                group.remove(world_id);
                if group.is_empty() {
                    drop(group);
                    self.credential_groups.remove(&credential);
                }
            }
        }
    }

    /// Look up the live connection for `world_id`.
    #[must_use]
    pub fn get(&self, world_id: &WorldId) -> Option<Connection> {
        self.connections.get(world_id).map(|c| c.clone())
    }

    /// All world ids with a locally-live connection.
    #[must_use]
    pub fn live_world_ids(&self) -> Vec<WorldId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Every connection owned by `credential`.
    #[must_use]
    pub fn connected_for(&self, credential: &Credential) -> Vec<Connection> {
        self.credential_groups
            .get(credential)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Send `message` to every connection in `sender_id`'s credential
    /// group except `sender_id` itself. Iterates a snapshot so
    /// concurrent insertions/removals never invalidate the fan-out
    /// (spec.md §5).
    pub fn broadcast(&self, sender_id: &WorldId, credential: &Credential, message: &RelayMessage) {
        let snapshot: Vec<WorldId> =
            self.credential_groups.get(credential).map(|ids| ids.iter().cloned().collect()).unwrap_or_default();
        for world_id in snapshot {
            if &world_id == sender_id {
                continue;
            }
            if let Some(connection) = self.get(&world_id) {
                connection.send(message.clone());
            }
        }
    }

    /// Evict every connection whose [`Connection::is_alive`] is
    /// false. Runs every [`SWEEP_INTERVAL`].
    pub fn sweep(&self) {
        let dead: Vec<WorldId> =
            self.connections.iter().filter(|e| !e.value().is_alive()).map(|e| e.key().clone()).collect();
        for world_id in dead {
            info!(world_id = %world_id, "sweeping dead connection");
            self.remove(&world_id);
        }
    }
}

async fn run_event_loop(registry: Arc<ClientRegistry>, mut events: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Message { world_id, credential, message } => {
                if let Some(handler) = registry.handlers.get(&message.kind) {
                    handler.value()(world_id, credential, message);
                } else {
                    registry.broadcast(&world_id, &credential, &message);
                }
            },
            ConnectionEvent::Closed { world_id } => {
                registry.remove(&world_id);
            },
        }
    }
}

async fn run_sweep_loop(registry: Arc<ClientRegistry>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        registry.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_matches_spec() {
        assert_eq!(SWEEP_INTERVAL, Duration::from_secs(15));
    }
}
