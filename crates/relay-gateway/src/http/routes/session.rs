//! `/session-handshake`, `/start-session`, `/session`, `/end-session`
//! — the two-step headless-login handshake plus session lookup/end
//! (spec.md §4.G, §6). Authenticated but not billable: no quota is
//! charged for driving a login.

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use relay_core::{Credential, RelayError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::error::ApiError;
use crate::http::state::AppState;

#[derive(Deserialize)]
pub struct HandshakeRequest {
    #[serde(rename = "destinationUrl")]
    destination_url: String,
    #[serde(rename = "worldName")]
    world_name: Option<String>,
    username: String,
}

/// Step 1: mint a handshake keypair and token.
pub async fn session_handshake(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<HandshakeRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.destination_url.trim().is_empty() || body.username.trim().is_empty() {
        return Err(ApiError(RelayError::InvalidInput {
            message: "destinationUrl and username are required".to_string(),
            how_to_use: None,
        }));
    }
    let minted = state
        .sessions
        .mint(&credential, &body.destination_url, body.world_name.as_deref(), &body.username)
        .await?;
    Ok(Json(json!({
        "token": minted.token,
        "publicKey": minted.public_key_pem,
        "nonce": minted.nonce,
        "expiresAt": minted.expires_at.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    token: String,
    #[serde(rename = "encryptedPayload")]
    encrypted_payload: String,
}

/// Step 2: redeem the handshake and drive the headless login.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<StartSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.sessions.redeem(&body.token, &credential, &body.encrypted_payload).await?;
    Ok(Json(json!({"sessionId": handle.session_id, "clientId": handle.world_id})))
}

/// The session currently bound to the caller's credential, if any.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
) -> Result<Json<Value>, ApiError> {
    match state.sessions.current(&credential).await? {
        Some(info) => Ok(Json(json!({
            "sessionId": info.session_id,
            "clientId": info.world_id,
            "owningInstance": info.owning_instance,
            "createdAt": info.created_at,
            "lastActivity": info.last_activity,
        }))),
        None => Err(ApiError(RelayError::NotFound { message: "no active session".to_string(), available_clients: None })),
    }
}

#[derive(Deserialize)]
pub struct EndSessionRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Explicit end-session.
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<EndSessionRequest>,
) -> Result<StatusCode, ApiError> {
    state.sessions.end(&body.session_id, &credential).await?;
    Ok(StatusCode::NO_CONTENT)
}
