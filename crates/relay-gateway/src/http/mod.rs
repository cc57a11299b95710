//! Component H: the HTTP/WebSocket surface (spec.md §4.H, §6).
//!
//! `build_router` assembles three route groups that share the same
//! `AppState` but differ in which middleware they mount:
//!
//! - public: no credential required at all.
//! - authenticated, non-billable: the headless-login handshake and
//!   session lookup — driving a login costs the operator nothing.
//! - authenticated, billable: every operation that round-trips a
//!   connected world.
//!
//! `/relay`'s socket upgrade sits outside all three: it authenticates
//! itself at the socket layer (query `id`/`token`), so none of the
//! HTTP-layer middleware — which expects an `x-api-key` header and a
//! bufferable body — applies to it.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use self::middleware::{authenticate, forwarding_lookup, sanitize_response, usage_accounting};
use self::routes::{auth, clients, meta, proxy, session, world_ops, ws};
use self::state::AppState;

fn public_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(meta::status))
        .route("/api/docs", get(meta::docs))
        .route("/api/health", get(meta::health))
        .route("/register", post(auth::register))
        .with_state(state)
}

/// Authenticated but exempt from usage accounting (spec.md §6): the
/// handshake dance that stands a headless session up.
fn non_billable_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/session-handshake", post(session::session_handshake))
        .route("/start-session", post(session::start_session))
        .route("/session", get(session::get_session))
        .route("/end-session", delete(session::end_session))
        .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

/// Authenticated and billable: everything that reaches a connected
/// world, plus `/clients` and the asset proxy.
fn billable_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/clients", get(clients::clients))
        .route("/search", get(world_ops::search))
        .route("/get", get(world_ops::get_entity))
        .route("/structure", get(world_ops::structure))
        .route("/contents/*path", get(world_ops::contents))
        .route("/create", post(world_ops::create))
        .route("/update", put(world_ops::update))
        .route("/delete", delete(world_ops::delete))
        .route("/rolls", get(world_ops::rolls))
        .route("/lastroll", get(world_ops::lastroll))
        .route("/roll", get(world_ops::roll_get).post(world_ops::roll_post))
        .route("/sheet", get(world_ops::sheet))
        .route("/macros", get(world_ops::macros))
        .route("/macro/:uuid/execute", post(world_ops::macro_execute))
        .route("/encounters", get(world_ops::encounters))
        .route("/start-encounter", post(world_ops::start_encounter))
        .route("/next-turn", post(world_ops::next_turn))
        .route("/next-round", post(world_ops::next_round))
        .route("/last-turn", post(world_ops::last_turn))
        .route("/last-round", post(world_ops::last_round))
        .route("/end-encounter", post(world_ops::end_encounter))
        .route("/add-to-encounter", post(world_ops::add_to_encounter))
        .route("/remove-from-encounter", post(world_ops::remove_from_encounter))
        .route("/kill", post(world_ops::kill))
        .route("/increase", post(world_ops::increase))
        .route("/decrease", post(world_ops::decrease))
        .route("/give", post(world_ops::give))
        .route("/select", post(world_ops::select))
        .route("/selected", get(world_ops::selected))
        .route("/file-system", get(world_ops::file_system))
        .route("/upload", post(world_ops::upload))
        .route("/download", get(world_ops::download))
        .route("/execute-js", post(world_ops::execute_js))
        .route("/proxy-asset/*path", get(proxy::proxy_asset))
        .layer(axum::middleware::from_fn_with_state(state.clone(), usage_accounting))
        .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

/// Builds the full service: the three HTTP route groups wrapped in
/// the shared layer stack (spec.md §4.H order: CORS outermost under
/// the Sanitizer, then forwarding-lookup, then each group's own
/// authentication/accounting), with `/relay`'s socket upgrade mounted
/// outside that stack entirely.
pub fn build_router(state: Arc<AppState>) -> Router {
    let http_routes = Router::new()
        .merge(public_router(state.clone()))
        .merge(non_billable_router(state.clone()))
        .merge(billable_router(state.clone()))
        .layer(axum::middleware::from_fn(sanitize_response))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn_with_state(state.clone(), forwarding_lookup));

    Router::new().merge(http_routes).route("/relay", get(ws::relay_upgrade)).with_state(state)
}
