//! The layers spec.md §4.H applies, in order: CORS, body parsing,
//! forwarding-lookup, authentication, usage accounting, handler, and
//! (wrapping the whole stack so it catches both local and forwarded
//! responses) the Sanitizer.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use relay_core::RelayError;
use serde_json::Value;
use tracing::warn;

use crate::http::error::ApiError;
use crate::http::state::AppState;
use crate::router::{self, RouteDecision};
use crate::sanitize;

/// Cap on a request body this replica will buffer in memory to
/// inspect/forward, for any path but `/upload` (spec.md §4.H).
const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// `/upload`'s own cap (spec.md §4.H "raw for file upload up to 250 MiB").
const UPLOAD_BODY_LIMIT: usize = 250 * 1024 * 1024;

/// Step 2 of §4.H: decide local-vs-remote, forwarding and returning
/// the owner's response verbatim on a remote decision. A request
/// already carrying the forwarding marker, or one with no credential
/// header at all, always falls through to the local stack — an
/// unauthenticated request still needs to reach the authentication
/// layer to get its 401.
pub async fn forwarding_lookup(State(state): State<Arc<AppState>>, request: Request<Body>, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let limit = if parts.uri.path() == "/upload" { UPLOAD_BODY_LIMIT } else { DEFAULT_BODY_LIMIT };
    let already_forwarded = parts.headers.contains_key(router::FORWARD_MARKER_HEADER);

    let bytes = match to_bytes(body, limit).await {
        Ok(b) => b,
        Err(_) => {
            return ApiError(RelayError::InvalidInput {
                message: "request body exceeds the size limit for this endpoint".to_string(),
                how_to_use: None,
            })
            .into_response();
        },
    };

    if let Some(credential) = router::extract_credential(&parts.headers) {
        if let RouteDecision::Remote(owner) = state.router.decide(&credential, already_forwarded).await {
            let headers: Vec<(String, String)> = parts
                .headers
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
                .collect();
            let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| parts.uri.path()).to_string();

            match state.router.forward(&owner, parts.method.clone(), &path_and_query, &headers, bytes.clone()).await {
                Ok(forwarded) => return forwarded_into_response(forwarded),
                Err(RelayError::ForwardFailure(reason)) => {
                    warn!(owner, reason, "forward failed, falling through to local");
                },
                Err(e) => return ApiError(e).into_response(),
            }
        }
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

fn forwarded_into_response(forwarded: crate::router::ForwardedResponse) -> Response {
    let mut response =
        axum::http::StatusCode::from_u16(forwarded.status).unwrap_or(axum::http::StatusCode::BAD_GATEWAY).into_response();
    for (name, value) in &forwarded.headers {
        if let (Ok(name), Ok(value)) =
            (axum::http::HeaderName::try_from(name.as_str()), axum::http::HeaderValue::try_from(value.as_str()))
        {
            response.headers_mut().insert(name, value);
        }
    }
    *response.body_mut() = Body::from(forwarded.body);
    response
}

/// Authentication (spec.md §4.E): resolves the `x-api-key` header to a
/// user record, inserting both into request extensions for downstream
/// layers/handlers. Callers on an unauthenticated path never mount
/// this layer.
pub async fn authenticate(State(state): State<Arc<AppState>>, mut request: Request<Body>, next: Next) -> Response {
    let Some(credential) = router::extract_credential(request.headers()) else {
        return ApiError(RelayError::Unauthenticated).into_response();
    };
    match state.auth.authenticate(&credential).await {
        Ok(user) => {
            request.extensions_mut().insert(credential);
            request.extensions_mut().insert(user);
            next.run(request).await
        },
        Err(e) => ApiError(e).into_response(),
    }
}

/// Usage accounting (spec.md §4.E): charges the billable request
/// against the daily/monthly quota. Mounted only on routes spec.md §6
/// doesn't name as non-billable.
pub async fn usage_accounting(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<relay_core::Credential>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let today = relay_core::today_utc();
    if let Err(e) = state.auth.charge(&credential, today).await {
        return ApiError(e).into_response();
    }
    next.run(request).await
}

/// The Sanitizer (spec.md §4.J, §8 invariant 5), applied as a response
/// layer wrapping both the local handler stack and the forwarding
/// short-circuit, so a forwarded body is re-sanitized as cheaply as a
/// local one (idempotent either way).
pub async fn sanitize_response(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let sanitized = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut value) => {
            sanitize::sanitize(&mut value);
            Json(value).into_response().into_body()
        },
        Err(_) => Body::from(bytes),
    };
    Response::from_parts(parts, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_body_limit_is_ten_mebibytes() {
        assert_eq!(DEFAULT_BODY_LIMIT, 10 * 1024 * 1024);
    }

    #[test]
    fn upload_body_limit_matches_spec() {
        assert_eq!(UPLOAD_BODY_LIMIT, 250 * 1024 * 1024);
    }
}
