//! `GET /clients` — enumerate live worlds visible to the calling
//! credential (spec.md §6).

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::State;
use relay_core::Credential;
use serde_json::{Value, json};

use crate::http::state::AppState;

pub async fn clients(State(state): State<Arc<AppState>>, Extension(credential): Extension<Credential>) -> Json<Value> {
    let ids = state.router.available_clients(&credential).await;
    Json(json!({"total": ids.len(), "clients": ids}))
}
