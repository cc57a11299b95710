//! Component G: Session Controller.
//!
//! Ties the handshake (mint/redeem), the headless browser, and the
//! Client Registry together: drives step 2's redemption through to a
//! bound headless session, migrates a session when its world
//! reconnects on a different replica, and reaps idle sessions
//! (spec.md §4.G).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{Credential, RelayError, RelayResult, WorldId};
use relay_store::CoordinationStore;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::registry::ClientRegistry;
use crate::session::browser::{BrowserHandle, BrowserLauncher};
use crate::session::handshake::{HandshakeStore, PendingRedemption, RedemptionResult};

/// How often the sweep removes idle sessions (spec.md §4.G "Idle sweep").
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A session is idle, and reaped, past this much inactivity
/// (spec.md §3 Headless Session).
pub const IDLE_AFTER: Duration = Duration::from_secs(600);

/// How long the controller waits for the headless login's world to
/// connect back before giving up (spec.md §4.G step 7).
pub const LOGIN_CONNECT_BUDGET: Duration = Duration::from_secs(300);

fn session_key(session_id: &str) -> String {
    format!("headless_session:{session_id}")
}

fn client_key(world_id: &str) -> String {
    format!("headless_client:{world_id}")
}

fn apikey_session_key(credential: &str) -> String {
    format!("headless_apikey:{credential}:session")
}

/// TTL refreshed on every store write for headless session keys
/// (spec.md §3).
const SESSION_TTL: Duration = Duration::from_secs(10_800);

/// The outcome of redeeming a handshake, surfaced to the HTTP layer.
pub struct SessionHandle {
    /// The minted session id.
    pub session_id: String,
    /// The derived `worldId`, `"foundry-" + userId`.
    pub world_id: String,
}

/// The current session bound to a credential, surfaced to `GET /session`.
pub struct SessionInfo {
    /// The session id.
    pub session_id: String,
    /// The bound world id.
    pub world_id: String,
    /// The replica currently owning the headless browser.
    pub owning_instance: String,
    /// When the session was created, RFC 3339.
    pub created_at: String,
    /// When the session last saw activity, RFC 3339.
    pub last_activity: String,
}

struct LocalSession {
    browser: AsyncMutex<Box<dyn BrowserHandle>>,
    world_id: WorldId,
    credential: Credential,
    last_activity: std::sync::Mutex<std::time::Instant>,
}

/// Headless session lifecycle: redemption, migration, idle reaping,
/// explicit end.
pub struct SessionController {
    handshakes: Arc<HandshakeStore>,
    registry: Arc<ClientRegistry>,
    store: Arc<dyn CoordinationStore>,
    launcher: Arc<dyn BrowserLauncher>,
    replica_id: String,
    sessions: dashmap::DashMap<String, LocalSession>,
}

impl SessionController {
    /// Build a controller over the shared registry and store.
    #[must_use]
    pub fn new(
        handshakes: Arc<HandshakeStore>,
        registry: Arc<ClientRegistry>,
        store: Arc<dyn CoordinationStore>,
        launcher: Arc<dyn BrowserLauncher>,
        replica_id: String,
    ) -> Arc<Self> {
        let controller = Arc::new(Self { handshakes, registry, store, launcher, replica_id, sessions: dashmap::DashMap::new() });
        tokio::spawn(run_idle_sweep(controller.clone()));
        controller
    }

    /// Step 1: mint a handshake for `credential`, recording the
    /// destination/world/username the eventual redemption drives the
    /// browser with.
    pub async fn mint(
        &self,
        credential: &Credential,
        destination_url: &str,
        world_name: Option<&str>,
        username: &str,
    ) -> RelayResult<crate::session::handshake::MintedHandshake> {
        self.handshakes.mint(credential, destination_url, world_name, username).await
    }

    /// Step 2: redeem a handshake. Forwards to the owning replica via
    /// the store when this replica didn't mint it (spec.md §4.G step
    /// 2 item 2); otherwise drives the browser directly.
    pub async fn redeem(&self, token: &str, credential: &Credential, encrypted_payload: &str) -> RelayResult<SessionHandle> {
        let summary = self.handshakes.verify_owner(token, credential).await?;

        if !summary.is_local {
            self.handshakes.write_pending(token, credential, encrypted_payload).await?;
            return self.poll_for_result(token).await;
        }

        self.login_and_bind(token, credential, encrypted_payload, &summary).await
    }

    async fn poll_for_result(&self, token: &str) -> RelayResult<SessionHandle> {
        let deadline =
            tokio::time::Instant::now() + crate::session::handshake::PENDING_REDEMPTION_BUDGET;
        while tokio::time::Instant::now() < deadline {
            if let Some(result) = self.handshakes.read_result(token).await? {
                if result.status == 200 {
                    let session_id = result.body["sessionId"].as_str().unwrap_or_default().to_string();
                    let world_id = result.body["worldId"].as_str().unwrap_or_default().to_string();
                    return Ok(SessionHandle { session_id, world_id });
                }
                let message = result.body["error"].as_str().unwrap_or("redemption failed").to_string();
                return Err(RelayError::NotFound { message, available_clients: None });
            }
            tokio::time::sleep(crate::session::handshake::PENDING_REDEMPTION_POLL).await;
        }
        Err(RelayError::GatewayTimeout)
    }

    async fn login_and_bind(
        &self,
        token: &str,
        credential: &Credential,
        encrypted_payload: &str,
        summary: &crate::session::handshake::HandshakeSummary,
    ) -> RelayResult<SessionHandle> {
        use relay_crypto::HandshakeKeyPair;

        // One-shot invariant (spec.md §8): delete before proceeding so a
        // racing second redemption always sees the handshake absent.
        self.handshakes.delete(token).await?;

        let keypair = HandshakeKeyPair::from_private_pem(&summary.private_key_pem)
            .map_err(|e| RelayError::InvalidInput { message: e.to_string(), how_to_use: None })?;
        let redeemed = keypair
            .decrypt_redemption(encrypted_payload)
            .map_err(|e| RelayError::InvalidInput { message: e.to_string(), how_to_use: None })?;
        redeemed.verify_nonce(&summary.nonce).map_err(|_| RelayError::Unauthenticated)?;

        let browser = self.launcher.launch().await?;
        if let Err(e) = self.prepare_world(browser.as_ref(), summary).await {
            browser.close().await;
            return Err(e);
        }
        let user_id = match browser.login(&summary.username, &redeemed.password).await {
            Ok(user_id) => user_id,
            Err(e) => {
                browser.close().await;
                return Err(e);
            },
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let world_id = WorldId::from(format!("foundry-{user_id}"));

        self.register(&session_id, &world_id, credential).await?;
        self.sessions.insert(
            session_id.clone(),
            LocalSession {
                browser: AsyncMutex::new(browser),
                world_id: world_id.clone(),
                credential: credential.clone(),
                last_activity: std::sync::Mutex::new(std::time::Instant::now()),
            },
        );

        match self.await_connection(&world_id, credential).await {
            Ok(()) => {
                info!(session_id, world_id = %world_id, "headless session bound to live connection");
                Ok(SessionHandle { session_id, world_id: world_id.as_str().to_string() })
            },
            Err(e) => {
                self.end(&session_id, credential).await.ok();
                Err(e)
            },
        }
    }

    /// Navigate to and settle the destination world, stopping short of
    /// login. Split out of [`Self::login_and_bind`] so every early
    /// failure path closes the launched browser instead of leaking it.
    async fn prepare_world(
        &self,
        browser: &dyn BrowserHandle,
        summary: &crate::session::handshake::HandshakeSummary,
    ) -> RelayResult<()> {
        browser.navigate(&summary.destination_url).await?;
        browser.dismiss_overlays().await?;
        if let Some(world_name) = &summary.world_name {
            browser.enter_world(world_name).await?;
        }
        Ok(())
    }

    async fn register(&self, session_id: &str, world_id: &WorldId, credential: &Credential) -> RelayResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let key = session_key(session_id);
        self.store.hset(&key, "worldId", world_id.as_str()).await.map_err(store_err)?;
        self.store.hset(&key, "credential", credential.as_str()).await.map_err(store_err)?;
        self.store.hset(&key, "owningInstance", &self.replica_id).await.map_err(store_err)?;
        self.store.hset(&key, "createdAt", &now).await.map_err(store_err)?;
        self.store.hset(&key, "lastActivity", &now).await.map_err(store_err)?;
        self.store.expire(&key, SESSION_TTL).await.map_err(store_err)?;
        self.store.set(&client_key(world_id.as_str()), session_id, SESSION_TTL).await.map_err(store_err)?;
        self.store.set(&apikey_session_key(credential.as_str()), session_id, SESSION_TTL).await.map_err(store_err)?;
        Ok(())
    }

    async fn await_connection(&self, world_id: &WorldId, credential: &Credential) -> RelayResult<()> {
        let deadline = tokio::time::Instant::now() + LOGIN_CONNECT_BUDGET;
        while tokio::time::Instant::now() < deadline {
            if let Some(connection) = self.registry.get(world_id) {
                if connection.credential() == credential {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(RelayError::GatewayTimeout)
    }

    /// Record fresh activity for the session owning `world_id`, if
    /// any (resets the idle-sweep clock).
    pub fn touch(&self, world_id: &WorldId) {
        for entry in &self.sessions {
            if &entry.value().world_id == world_id {
                *entry.value().last_activity.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
                    std::time::Instant::now();
                return;
            }
        }
    }

    /// `GET /session`'s lookup: the session currently bound to
    /// `credential`, if any.
    pub async fn current(&self, credential: &Credential) -> RelayResult<Option<SessionInfo>> {
        let Some(session_id) = self.store.get(&apikey_session_key(credential.as_str())).await.map_err(store_err)? else {
            return Ok(None);
        };
        let fields: HashMap<String, String> = self.store.hgetall(&session_key(&session_id)).await.map_err(store_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(SessionInfo {
            session_id,
            world_id: fields.get("worldId").cloned().unwrap_or_default(),
            owning_instance: fields.get("owningInstance").cloned().unwrap_or_default(),
            created_at: fields.get("createdAt").cloned().unwrap_or_default(),
            last_activity: fields.get("lastActivity").cloned().unwrap_or_default(),
        }))
    }

    /// Explicit end-session (spec.md §4.G "End session"): verifies
    /// `credential` owns `session_id`, closes the browser locally if
    /// present, and removes all three store keys regardless.
    pub async fn end(&self, session_id: &str, credential: &Credential) -> RelayResult<()> {
        let fields: HashMap<String, String> = self.store.hgetall(&session_key(session_id)).await.map_err(store_err)?;
        if let Some(owner) = fields.get("credential") {
            if owner != credential.as_str() {
                return Err(RelayError::Unauthorized("session does not belong to this credential".to_string()));
            }
        }

        if let Some((_, local)) = self.sessions.remove(session_id) {
            local.browser.lock().await.close().await;
        }

        if let Some(world_id) = fields.get("worldId") {
            self.store.delete(&client_key(world_id)).await.map_err(store_err)?;
        }
        self.store.delete(&apikey_session_key(credential.as_str())).await.map_err(store_err)?;
        self.store.delete(&session_key(session_id)).await.map_err(store_err)?;
        Ok(())
    }

    /// Session migration (spec.md §4.G "Session migration"): called
    /// by the socket-upgrade handler when `world_id` validates against
    /// a session owned by a different replica. Rewrites the pointers
    /// to this replica and refreshes TTLs.
    pub async fn migrate(&self, session_id: &str, world_id: &WorldId, credential: &Credential) -> RelayResult<()> {
        let key = session_key(session_id);
        self.store.hset(&key, "owningInstance", &self.replica_id).await.map_err(store_err)?;
        self.store.expire(&key, SESSION_TTL).await.map_err(store_err)?;
        self.store.set(&client_key(world_id.as_str()), session_id, SESSION_TTL).await.map_err(store_err)?;
        self.store.set(&apikey_session_key(credential.as_str()), session_id, SESSION_TTL).await.map_err(store_err)?;
        info!(session_id, world_id = %world_id, replica = %self.replica_id, "migrated headless session to this replica");
        Ok(())
    }

    /// Called from the `/relay` upgrade handler before accepting a
    /// socket: if `world_id` is bound to a headless session owned by a
    /// different replica, migrates it here. A world with no bound
    /// session (an ordinary, non-headless connection) is a no-op.
    pub async fn ensure_local(&self, world_id: &WorldId, credential: &Credential) -> RelayResult<()> {
        let Some(session_id) = self.store.get(&client_key(world_id.as_str())).await.map_err(store_err)? else {
            return Ok(());
        };
        let owning_instance =
            self.store.hgetall(&session_key(&session_id)).await.map_err(store_err)?.get("owningInstance").cloned();
        if owning_instance.as_deref() == Some(self.replica_id.as_str()) {
            return Ok(());
        }
        self.migrate(&session_id, world_id, credential).await
    }

    /// Reap sessions whose local activity clock is past [`IDLE_AFTER`].
    /// Runs every [`IDLE_SWEEP_INTERVAL`].
    pub async fn sweep_idle(&self) {
        let idle: Vec<(String, Credential)> = self
            .sessions
            .iter()
            .filter(|entry| {
                let last_activity =
                    *entry.value().last_activity.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                last_activity.elapsed() > IDLE_AFTER
            })
            .map(|entry| (entry.key().clone(), entry.value().credential.clone()))
            .collect();

        for (session_id, credential) in idle {
            info!(session_id, "reaping idle headless session");
            if let Err(e) = self.end(&session_id, &credential).await {
                warn!(session_id, error = %e, "failed to fully clean up idle session");
            }
        }
    }

    /// The pending-redemption poller's view: tokens this replica
    /// minted and may need to service a forwarded redemption for.
    #[must_use]
    pub fn pending_tokens(&self) -> Vec<String> {
        self.handshakes.locally_minted_tokens()
    }

    /// Service one forwarded redemption for `token`, if a non-owning
    /// replica has written one. Called by the scheduled poller job.
    pub async fn service_pending(&self, token: &str) -> RelayResult<bool> {
        let Some(pending) = self.handshakes.read_pending(token).await? else { return Ok(false) };
        let credential = Credential::from(pending.credential.clone());
        let summary = self.handshakes.verify_owner(token, &credential).await;
        let summary = match summary {
            Ok(summary) if summary.is_local => summary,
            _ => {
                // Handshake vanished or no longer ours; nothing to service.
                self.handshakes.forget_local(token);
                return Ok(true);
            },
        };

        let result = self.login_and_bind(token, &credential, &pending.encrypted_payload, &summary).await;

        let redemption_result = match result {
            Ok(handle) => {
                RedemptionResult { status: 200, body: serde_json::json!({"sessionId": handle.session_id, "worldId": handle.world_id}) }
            },
            Err(e) => RedemptionResult { status: e.status_code(), body: e.body() },
        };
        self.handshakes.write_result(token, &redemption_result).await?;
        Ok(true)
    }
}

fn store_err(e: relay_store::StoreError) -> RelayError {
    RelayError::Internal(anyhow::anyhow!(e))
}

async fn run_idle_sweep(controller: Arc<SessionController>) {
    let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        controller.sweep_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_sweep_interval_matches_spec() {
        assert_eq!(IDLE_SWEEP_INTERVAL, Duration::from_secs(60));
    }

    #[test]
    fn idle_after_is_ten_minutes_per_spec() {
        assert_eq!(IDLE_AFTER, Duration::from_secs(600));
    }

    #[test]
    fn session_keys_match_spec_naming() {
        assert_eq!(session_key("s1"), "headless_session:s1");
        assert_eq!(client_key("foundry-u1"), "headless_client:foundry-u1");
        assert_eq!(apikey_session_key("k1"), "headless_apikey:k1:session");
    }
}
