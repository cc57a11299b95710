//! `/register` — create a user and mint a credential (spec.md §6).
//! Unauthenticated: this is how a caller gets a credential in the
//! first place.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use relay_core::RelayError;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::http::error::ApiError;
use crate::http::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.email.trim().is_empty() {
        return Err(ApiError(RelayError::InvalidInput {
            message: "email is required".to_string(),
            how_to_use: Some("POST /register with {\"email\": \"you@example.com\"}".to_string()),
        }));
    }
    let user = state.auth.register(body.email.trim()).await?;
    Ok((StatusCode::CREATED, Json(json!({"credential": user.credential, "email": user.email}))))
}
