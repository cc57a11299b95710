//! `/api/status`, `/api/docs`, `/api/health` — unauthenticated
//! liveness/documentation (spec.md §6).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::http::state::AppState;

/// Replica identity, in-flight waiter count, and live connection
/// count, for operators and load balancers.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "replicaId": state.replica_id,
        "liveConnections": state.registry.live_world_ids().len(),
        "pendingRequests": state.pending.len(),
    }))
}

/// A minimal machine-readable endpoint catalogue (spec.md §6).
pub async fn docs() -> Json<Value> {
    Json(json!({
        "endpoints": [
            {"path": "/search", "method": "GET", "deadlineSeconds": 10},
            {"path": "/create", "method": "POST", "deadlineSeconds": 10},
            {"path": "/update", "method": "PUT", "deadlineSeconds": 10},
            {"path": "/delete", "method": "DELETE", "deadlineSeconds": 10},
            {"path": "/roll", "method": "POST", "deadlineSeconds": 5},
            {"path": "/macro/:uuid/execute", "method": "POST", "deadlineSeconds": 15},
            {"path": "/upload", "method": "POST", "deadlineSeconds": 30},
            {"path": "/relay", "method": "GET", "description": "WebSocket upgrade for world connections"},
        ],
    }))
}

/// Bare liveness probe, no state touched.
pub async fn health() -> &'static str {
    "ok"
}
