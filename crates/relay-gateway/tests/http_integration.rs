//! End-to-end HTTP surface tests: a real `axum::Router` built by
//! `build_router`, driven with `tower::util::ServiceExt::oneshot`
//! against a `LocalStore` and a `MemoryUserStore` — no network, no
//! mocked traits below the HTTP boundary.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use async_trait::async_trait;
use relay_config::{OperationDeadlines, QuotaTable};
use relay_core::RelayResult;
use relay_gateway::auth::{AuthService, MemoryUserStore};
use relay_gateway::http::build_router;
use relay_gateway::http::state::AppState;
use relay_gateway::pending::PendingRegistry;
use relay_gateway::registry::ClientRegistry;
use relay_gateway::router::RequestRouter;
use relay_gateway::session::browser::{BrowserHandle, BrowserLauncher};
use relay_gateway::session::{HandshakeStore, SessionController};
use relay_store::{CoordinationStore, LocalStore};
use serde_json::{Value, json};
use tower::util::ServiceExt;

/// A launcher that never actually launches anything; none of these
/// tests drive a headless session far enough to need one.
struct DeadLauncher;

#[async_trait]
impl BrowserLauncher for DeadLauncher {
    async fn launch(&self) -> RelayResult<Box<dyn BrowserHandle>> {
        Err(relay_core::RelayError::Internal(anyhow::anyhow!("no browser available in tests")))
    }
}

fn test_state() -> Arc<AppState> {
    let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
    let replica_id = "test-replica".to_string();
    let registry = ClientRegistry::new(store.clone(), replica_id.clone());
    let pending = PendingRegistry::spawn();
    let router = Arc::new(RequestRouter::new(registry.clone(), pending.clone(), store.clone(), replica_id.clone(), 3010));
    let user_store = Arc::new(MemoryUserStore::default());
    let auth = Arc::new(AuthService::new(user_store, QuotaTable::from_free_monthly_limit(100)));
    let handshakes = Arc::new(HandshakeStore::new(store.clone(), replica_id.clone()));
    let sessions = SessionController::new(handshakes.clone(), registry.clone(), store.clone(), Arc::new(DeadLauncher), replica_id.clone());

    Arc::new(AppState {
        registry,
        pending,
        router,
        auth,
        sessions,
        handshakes,
        store,
        deadlines: OperationDeadlines::default(),
        replica_id,
        asset_client: reqwest::Client::new(),
    })
}

fn app() -> Router {
    build_router(test_state())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &Router, email: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header("content-type", "application/json")
        .body(Body::from(json!({"email": email}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    body["credential"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_and_status_are_reachable_unauthenticated() {
    let app = app();

    let response = app.clone().oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");

    let response = app.clone().oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["replicaId"], "test-replica");
    assert_eq!(body["liveConnections"], 0);

    let response = app.clone().oneshot(Request::builder().uri("/api/docs").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_mints_a_credential_and_rejects_duplicate_email() {
    let app = app();
    let credential = register(&app, "student@example.com").await;
    assert!(!credential.is_empty());

    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header("content-type", "application/json")
        .body(Body::from(json!({"email": "student@example.com"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn register_rejects_blank_email() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header("content-type", "application/json")
        .body(Body::from(json!({"email": "  "}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn billable_route_without_credential_is_unauthenticated() {
    let app = app();
    let request = Request::builder().uri("/clients").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn billable_route_with_unknown_credential_is_unauthenticated() {
    let app = app();
    let request = Request::builder().uri("/clients").header("x-api-key", "not-a-real-credential").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn clients_returns_empty_list_for_a_registered_credential_with_no_worlds() {
    let app = app();
    let credential = register(&app, "clients-test@example.com").await;

    let request = Request::builder().uri("/clients").header("x-api-key", &credential).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 0);
    assert_eq!(body["clients"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn search_against_an_unconnected_world_returns_not_found_with_available_clients() {
    let app = app();
    let credential = register(&app, "search-test@example.com").await;

    let request = Request::builder()
        .uri("/search?clientId=ghost-world&query=anything")
        .header("x-api-key", &credential)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["availableClients"].is_array());
}

#[tokio::test]
async fn every_response_body_is_valid_json_or_plain_text_after_sanitization() {
    let app = app();
    let credential = register(&app, "sanitize-test@example.com").await;

    let request = Request::builder().uri("/clients").header("x-api-key", &credential).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("content-type").unwrap().to_str().unwrap().starts_with("application/json"));
    let body = body_json(response).await;
    assert!(body.is_object());
}

#[tokio::test]
async fn usage_accounting_charges_only_billable_routes() {
    let app = app();
    let credential = register(&app, "accounting-test@example.com").await;

    // Non-billable: a session lookup with no session bound should 404,
    // but must not consume quota.
    let request =
        Request::builder().uri("/session").header("x-api-key", &credential).body(Body::empty()).unwrap();
    let _ = app.clone().oneshot(request).await.unwrap();

    // A billable request against the same credential still succeeds
    // (i.e. the non-billable lookup didn't exhaust the quota).
    let request = Request::builder().uri("/clients").header("x-api-key", &credential).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
