//! `GET /relay` — the socket upgrade endpoint worlds connect through
//! (spec.md §4.C, §6). Query `id` names the world, `token` the owning
//! credential; a missing or rejected upgrade closes with the matching
//! code from `connection` rather than failing the HTTP upgrade itself,
//! so a client always gets a clean WebSocket close frame to read.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::SinkExt;
use relay_core::{Credential, WorldId};
use tracing::{info, warn};

use crate::connection::{CLOSE_INTERNAL_ERROR, CLOSE_NO_AUTH, CLOSE_NO_CLIENT_ID};
use crate::http::state::AppState;

pub async fn relay_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let world_id = params.get("id").cloned();
    let token = params.get("token").cloned();
    ws.on_upgrade(move |socket| handle_socket(socket, state, world_id, token))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame { code, reason: reason.into() };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, world_id: Option<String>, token: Option<String>) {
    let Some(world_id) = world_id else {
        close_with(socket, CLOSE_NO_CLIENT_ID, "missing id query parameter").await;
        return;
    };
    let Some(token) = token else {
        close_with(socket, CLOSE_NO_AUTH, "missing token query parameter").await;
        return;
    };

    let world_id = WorldId::from(world_id);
    let credential = Credential::from(token);

    if let Err(e) = state.sessions.ensure_local(&world_id, &credential).await {
        warn!(world_id = %world_id, error = %e, "session migration check failed before upgrade");
        close_with(socket, CLOSE_INTERNAL_ERROR, "internal error").await;
        return;
    }

    match state.registry.add(socket, world_id.clone(), credential).await {
        Some(_connection) => info!(world_id = %world_id, "world connected"),
        None => {}, // registry.add already closed the duplicate upgrade itself
    }
}
