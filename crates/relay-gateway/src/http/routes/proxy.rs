//! `/proxy-asset/*` — streams an asset from a world's origin so a
//! browser rendering a sheet never needs direct network access to the
//! world (spec.md §6). Known icon-font/texture hosts are redirected to
//! a fixed CDN fallback instead of being proxied; an image miss
//! degrades to a 1x1 transparent PNG rather than an error, since a
//! missing token/portrait image shouldn't break sheet rendering.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use std::collections::HashMap;

use crate::http::state::AppState;

/// Hosts whose assets are better served from a CDN than proxied
/// through this replica.
const ICON_FONT_HOSTS: &[&str] = &["fontawesome.com", "kit.fontawesome.com", "use.fontawesome.com"];

const FONT_AWESOME_CDN_FALLBACK: &str = "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.5.1/css/all.min.css";

/// A 1x1 fully-transparent PNG, served when the upstream asset fetch
/// fails.
const TRANSPARENT_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49,
    0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

fn is_icon_font_url(url: &str) -> bool {
    ICON_FONT_HOSTS.iter().any(|host| url.contains(host))
}

fn transparent_pixel_response() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], TRANSPARENT_PIXEL).into_response()
}

/// Proxies `?url=` from the world's origin, redirecting known
/// icon-font hosts and falling back to a transparent pixel on fetch
/// failure for anything that looks like an image request.
pub async fn proxy_asset(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(url) = params.get("url") else {
        return (StatusCode::BAD_REQUEST, "missing ?url=").into_response();
    };

    if is_icon_font_url(url) {
        return Redirect::temporary(FONT_AWESOME_CDN_FALLBACK).into_response();
    }

    match state.asset_client.get(url).send().await {
        Ok(upstream) if upstream.status().is_success() => {
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut headers = HeaderMap::new();
                    headers.insert(header::CONTENT_TYPE, content_type);
                    (headers, bytes).into_response()
                },
                Err(_) => transparent_pixel_response(),
            }
        },
        _ => transparent_pixel_response(),
    }
}
