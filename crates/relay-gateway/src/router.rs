//! Component F: Request Router.
//!
//! Decides whether the target world's owning replica is this one; if
//! not, streams the HTTP request to the owner and streams its
//! response back. Locally, mints a correlation id, registers a
//! waiter, sends the outbound message, and awaits the reply within
//! the operation's deadline (spec.md §4.F).

use std::sync::Arc;
use std::time::Duration;

use relay_core::{Credential, RelayError, RelayMessage, RelayResult, ReplyKind, WorldId};
use relay_store::CoordinationStore;
use serde_json::Value;
use tracing::warn;

use crate::pending::{PendingRegistry, SecondaryKey, WaiterOutcome};
use crate::registry::ClientRegistry;

/// Header added to a forwarded request to prevent forwarding loops
/// (spec.md §4.F).
pub const FORWARD_MARKER_HEADER: &str = "x-relay-forwarded";

/// Total time budget for a cross-replica forward (spec.md §4.F).
pub const FORWARD_BUDGET: Duration = Duration::from_secs(60);

/// Where a request should be served.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Serve from this replica's local Client Registry.
    Local,
    /// Forward to the named owning replica.
    Remote(String),
}

/// A forwarded response, ready to be relayed back to the original
/// caller unchanged except for hop-by-hop headers.
pub struct ForwardedResponse {
    /// Upstream status code.
    pub status: u16,
    /// Upstream headers, hop-by-hop headers already stripped.
    pub headers: Vec<(String, String)>,
    /// Upstream response body.
    pub body: bytes::Bytes,
}

const HOP_BY_HOP_HEADERS: &[&str] =
    &["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailer", "transfer-encoding", "upgrade"];

/// Cross-replica request router and local dispatch.
pub struct RequestRouter {
    registry: Arc<ClientRegistry>,
    pending: Arc<PendingRegistry>,
    store: Arc<dyn CoordinationStore>,
    http_client: reqwest::Client,
    replica_id: String,
    port: u16,
}

impl RequestRouter {
    /// Build a router over the local registry/pending state and the
    /// coordination store used for ownership lookups.
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry>,
        pending: Arc<PendingRegistry>,
        store: Arc<dyn CoordinationStore>,
        replica_id: String,
        port: u16,
    ) -> Self {
        let http_client =
            reqwest::Client::builder().timeout(FORWARD_BUDGET).build().unwrap_or_else(|_| reqwest::Client::new());
        Self { registry, pending, store, http_client, replica_id, port }
    }

    /// Decide whether to serve `credential`'s request locally or
    /// forward it. A request that already carries the forwarding
    /// marker always executes locally, preventing forward loops
    /// (spec.md §4.F, §8 invariant 9).
    pub async fn decide(&self, credential: &Credential, already_forwarded: bool) -> RouteDecision {
        if already_forwarded {
            return RouteDecision::Local;
        }
        match self.store.get(&format!("apikey:{}:instance", credential.as_str())).await {
            Ok(Some(owner)) if owner != self.replica_id => RouteDecision::Remote(owner),
            _ => RouteDecision::Local,
        }
    }

    /// Forward `method path_and_query` with `headers`/`body`
    /// preserved to `owner`, adding the loop-prevention marker.
    /// Streams the response back unchanged (minus hop-by-hop
    /// headers).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ForwardFailure`] on connection failure
    /// (caller falls through to local per spec.md §4.F) and
    /// [`RelayError::GatewayTimeout`] if the budget is exceeded.
    pub async fn forward(
        &self,
        owner: &str,
        method: reqwest::Method,
        path_and_query: &str,
        headers: &[(String, String)],
        body: bytes::Bytes,
    ) -> RelayResult<ForwardedResponse> {
        let url = format!("http://{owner}:{port}{path_and_query}", port = self.port);
        let mut request = self.http_client.request(method, &url);
        for (name, value) in headers {
            if !HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                request = request.header(name, value);
            }
        }
        request = request.header(FORWARD_MARKER_HEADER, "1").body(body);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::GatewayTimeout
            } else {
                RelayError::ForwardFailure(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()))
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await.map_err(|e| RelayError::ForwardFailure(e.to_string()))?;

        Ok(ForwardedResponse { status, headers, body })
    }

    /// Execute an operation against the world's socket: look up the
    /// connection, register a waiter, send, and await the reply
    /// within `deadline`.
    ///
    /// # Errors
    ///
    /// [`RelayError::NotFound`] if `world_id` has no live connection;
    /// [`RelayError::Internal`] if the outbound send fails;
    /// [`RelayError::UpstreamTimeout`] if no reply arrives by
    /// `deadline`.
    pub async fn dispatch_local(
        &self,
        world_id: &WorldId,
        credential: &Credential,
        kind: ReplyKind,
        payload: Value,
        secondary_key: Option<SecondaryKey>,
        deadline: Duration,
    ) -> RelayResult<RelayMessage> {
        let Some(connection) = self.registry.get(world_id) else {
            let available = self.available_clients(credential).await;
            return Err(RelayError::NotFound {
                message: format!("world {world_id} is not connected"),
                available_clients: Some(available),
            });
        };

        let corr_id = relay_core::CorrelationId::generate(kind.prefix());
        let receiver = self.pending.register(&corr_id, kind, world_id.clone(), secondary_key);
        let outbound = RelayMessage::operation(kind, corr_id.clone(), payload);

        if !connection.send(outbound) {
            self.pending.cancel(&corr_id);
            return Err(RelayError::Internal(anyhow::anyhow!("failed to send message to world {world_id}")));
        }

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(WaiterOutcome::Reply(message))) => Ok(message),
            Ok(Ok(WaiterOutcome::Failed { status: _, body })) => Err(RelayError::Internal(anyhow::anyhow!(
                "pending request failed: {body}"
            ))),
            Ok(Err(_)) => Err(RelayError::Internal(anyhow::anyhow!("waiter sender dropped"))),
            Err(_) => {
                self.pending.cancel(&corr_id);
                Err(RelayError::UpstreamTimeout { operation: kind.prefix().to_string() })
            },
        }
    }

    /// Live world ids visible to `credential`: this replica's own
    /// live connections, unioned with whatever the coordination store
    /// additionally knows about (other replicas' connections for the
    /// same credential group). Used both for `GET /clients` and for
    /// [`RelayError::NotFound`]'s `availableClients` hint.
    pub async fn available_clients(&self, credential: &Credential) -> Vec<String> {
        let mut ids: std::collections::HashSet<String> =
            self.registry.live_world_ids().into_iter().map(|id| id.as_str().to_string()).collect();
        if let Ok(store_ids) = self.store.smembers(&format!("apikey:{}:clients", credential.as_str())).await {
            ids.extend(store_ids);
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        ids
    }
}

/// Extract the owning credential's header value, logging (not
/// panicking) on absence — callers treat `None` as unauthenticated.
pub fn extract_credential(headers: &axum::http::HeaderMap) -> Option<Credential> {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(|s| Credential::from(s.to_string())).or_else(|| {
        warn!("request carried no x-api-key header");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_budget_is_sixty_seconds_per_spec() {
        assert_eq!(FORWARD_BUDGET, Duration::from_secs(60));
    }

    #[test]
    fn forward_marker_header_name_is_stable() {
        assert_eq!(FORWARD_MARKER_HEADER, "x-relay-forwarded");
    }
}
