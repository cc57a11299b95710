//! Shared state every HTTP handler and middleware layer reaches
//! through `axum`'s `State` extractor.

use std::sync::Arc;

use relay_config::OperationDeadlines;
use relay_store::CoordinationStore;

use crate::auth::AuthService;
use crate::pending::PendingRegistry;
use crate::registry::ClientRegistry;
use crate::router::RequestRouter;
use crate::session::{HandshakeStore, SessionController};

/// Everything a route handler needs, wired up once in `main.rs` and
/// shared behind an `Arc` across every connection and request.
pub struct AppState {
    /// Component C.
    pub registry: Arc<ClientRegistry>,
    /// Component D.
    pub pending: Arc<PendingRegistry>,
    /// Component F.
    pub router: Arc<RequestRouter>,
    /// Component E.
    pub auth: Arc<AuthService>,
    /// Component G.
    pub sessions: Arc<SessionController>,
    /// Step 1/2 of Component G's handshake.
    pub handshakes: Arc<HandshakeStore>,
    /// Component A, reached directly for the `/clients` union lookup
    /// and the `/relay` upgrade's session-migration check.
    pub store: Arc<dyn CoordinationStore>,
    /// Per-operation reply deadlines.
    pub deadlines: OperationDeadlines,
    /// This replica's identity, surfaced on `/api/status`.
    pub replica_id: String,
    /// Outbound client for `/proxy-asset/*`, kept separate from
    /// [`RequestRouter`]'s internal forwarding client since it talks to
    /// arbitrary world origins rather than sibling replicas.
    pub asset_client: reqwest::Client,
}
