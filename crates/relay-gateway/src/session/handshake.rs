//! Handshake mint/redeem (spec.md §4.G steps 1–3).
//!
//! Step 1 mints an RSA keypair and a one-shot token; step 2 redeems
//! it, decrypting the caller's password without it ever crossing the
//! wire in plaintext. Both steps persist through the coordination
//! store so any replica can mint or fetch a handshake — only the
//! minting replica may *redeem* it directly (spec.md §3 Handshake
//! Token "owning instance").

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use relay_core::{Credential, RelayError, RelayResult};
use relay_crypto::HandshakeKeyPair;
use relay_store::CoordinationStore;
use serde::{Deserialize, Serialize};

/// Handshake lifetime (spec.md §3).
pub const HANDSHAKE_TTL: Duration = Duration::from_secs(300);

/// `pending_session:{t}` store-key TTL (spec.md §3). Distinct from
/// [`PENDING_REDEMPTION_BUDGET`]: this bounds how long a forwarded
/// redemption waits to be picked up; the budget bounds how long the
/// forwarding replica waits for the outcome.
const PENDING_SESSION_TTL: Duration = Duration::from_secs(300);

/// `session_result:{t}` store-key TTL (spec.md §3 "TTL short").
const SESSION_RESULT_TTL: Duration = Duration::from_secs(300);

/// Forward-and-poll budget for a cross-replica handshake redemption
/// (spec.md §5 "caps at 10 minutes").
pub const PENDING_REDEMPTION_BUDGET: Duration = Duration::from_secs(600);

/// Poll interval while waiting on a cross-replica `session_result`
/// (spec.md §4.G step 2).
pub const PENDING_REDEMPTION_POLL: Duration = Duration::from_secs(2);

fn pending_key(token: &str) -> String {
    format!("pending_session:{token}")
}

fn result_key(token: &str) -> String {
    format!("session_result:{token}")
}

/// The redemption payload a non-owning replica hands off to the
/// owning one.
#[derive(Serialize, Deserialize)]
pub struct PendingRedemption {
    /// The calling credential, re-checked by the owning replica.
    pub credential: String,
    /// The still-encrypted RSA-OAEP payload.
    pub encrypted_payload: String,
}

/// What the owning replica's poller writes back for a forwarded
/// redemption.
#[derive(Serialize, Deserialize)]
pub struct RedemptionResult {
    /// HTTP status the original caller should see.
    pub status: u16,
    /// JSON response body, serialized.
    pub body: serde_json::Value,
}

/// Coordination-store key for one handshake's field hash.
fn handshake_key(token: &str) -> String {
    format!("handshake:{token}")
}

/// The public half of a freshly-minted handshake, returned to the
/// caller from step 1.
pub struct MintedHandshake {
    /// The one-shot token identifying this handshake.
    pub token: String,
    /// PEM-encoded RSA public key the caller encrypts against.
    pub public_key_pem: String,
    /// Nonce the caller must echo back inside the encrypted payload.
    pub nonce: String,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

struct HandshakeRecord {
    credential: String,
    destination_url: String,
    world_name: Option<String>,
    username: String,
    private_key_pem: String,
    nonce: String,
    expires_at: DateTime<Utc>,
    owning_instance: String,
}

/// Mint/redeem surface over the coordination store.
///
/// `minted_locally` is the "local handshake map" named in spec.md §5
/// — the set of tokens this replica minted and hasn't yet redeemed,
/// used by the pending-redemption poller (spec.md §4.G step 2) to
/// know which `pending_session:*` keys are its own to pick up without
/// a store-wide key scan.
pub struct HandshakeStore {
    store: std::sync::Arc<dyn CoordinationStore>,
    replica_id: String,
    minted_locally: DashSet<String>,
}

impl HandshakeStore {
    /// Build a handshake store bound to this replica's identity.
    #[must_use]
    pub fn new(store: std::sync::Arc<dyn CoordinationStore>, replica_id: String) -> Self {
        Self { store, replica_id, minted_locally: DashSet::new() }
    }

    /// Step 1: mint a keypair and token, persist the handshake
    /// (including the destination/world/username the eventual
    /// redemption drives the browser with), and return the public
    /// half.
    pub async fn mint(
        &self,
        credential: &Credential,
        destination_url: &str,
        world_name: Option<&str>,
        username: &str,
    ) -> RelayResult<MintedHandshake> {
        let keypair = HandshakeKeyPair::generate().map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;
        let public_key_pem =
            keypair.public_key_pem().map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;
        let private_key_pem =
            keypair.private_key_pem().map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;
        let token = relay_crypto::random_token();
        let nonce = relay_crypto::random_nonce();
        let expires_at = Utc::now() + chrono::Duration::seconds(HANDSHAKE_TTL.as_secs() as i64);

        let key = handshake_key(&token);
        self.store.hset(&key, "credential", credential.as_str()).await.map_err(store_err)?;
        self.store.hset(&key, "destinationUrl", destination_url).await.map_err(store_err)?;
        if let Some(world_name) = world_name {
            self.store.hset(&key, "worldName", world_name).await.map_err(store_err)?;
        }
        self.store.hset(&key, "username", username).await.map_err(store_err)?;
        self.store.hset(&key, "privateKeyPem", private_key_pem.as_str()).await.map_err(store_err)?;
        self.store.hset(&key, "nonce", &nonce).await.map_err(store_err)?;
        self.store.hset(&key, "expiresAt", &expires_at.to_rfc3339()).await.map_err(store_err)?;
        self.store.hset(&key, "owningInstance", &self.replica_id).await.map_err(store_err)?;
        self.store.expire(&key, HANDSHAKE_TTL).await.map_err(store_err)?;
        self.minted_locally.insert(token.clone());

        Ok(MintedHandshake { token, public_key_pem, nonce, expires_at })
    }

    /// Tokens minted locally and not yet redeemed, for the
    /// pending-redemption poller.
    #[must_use]
    pub fn locally_minted_tokens(&self) -> Vec<String> {
        self.minted_locally.iter().map(|t| t.clone()).collect()
    }

    /// Stop tracking `token` locally. Called once it's been redeemed
    /// (successfully or not) or once its handshake is deleted.
    pub fn forget_local(&self, token: &str) {
        self.minted_locally.remove(token);
    }

    /// Non-owning replica's half of step 2: hand the encrypted
    /// payload off to the owning replica via the store.
    pub async fn write_pending(&self, token: &str, credential: &Credential, encrypted_payload: &str) -> RelayResult<()> {
        let payload = PendingRedemption { credential: credential.as_str().to_string(), encrypted_payload: encrypted_payload.to_string() };
        let json = serde_json::to_string(&payload).map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;
        self.store.set(&pending_key(token), &json, PENDING_SESSION_TTL).await.map_err(store_err)
    }

    /// Owning replica's poller: read a pending redemption handed off
    /// by another replica, if any.
    pub async fn read_pending(&self, token: &str) -> RelayResult<Option<PendingRedemption>> {
        match self.store.get(&pending_key(token)).await.map_err(store_err)? {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| RelayError::Internal(anyhow::anyhow!(e))),
            None => Ok(None),
        }
    }

    /// Owning replica's poller: publish the redemption's outcome and
    /// clear the pending marker.
    pub async fn write_result(&self, token: &str, result: &RedemptionResult) -> RelayResult<()> {
        let json = serde_json::to_string(result).map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;
        self.store.set(&result_key(token), &json, SESSION_RESULT_TTL).await.map_err(store_err)?;
        self.store.delete(&pending_key(token)).await.map_err(store_err)
    }

    /// Non-owning replica's poll: check for a published result.
    pub async fn read_result(&self, token: &str) -> RelayResult<Option<RedemptionResult>> {
        match self.store.get(&result_key(token)).await.map_err(store_err)? {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| RelayError::Internal(anyhow::anyhow!(e))),
            None => Ok(None),
        }
    }

    async fn fetch(&self, token: &str) -> RelayResult<Option<HandshakeRecord>> {
        let fields: HashMap<String, String> = self.store.hgetall(&handshake_key(token)).await.map_err(store_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let expires_at = fields
            .get("expiresAt")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let Some(expires_at) = expires_at else { return Ok(None) };
        if expires_at < Utc::now() {
            return Ok(None);
        }
        Ok(Some(HandshakeRecord {
            credential: fields.get("credential").cloned().unwrap_or_default(),
            destination_url: fields.get("destinationUrl").cloned().unwrap_or_default(),
            world_name: fields.get("worldName").cloned(),
            username: fields.get("username").cloned().unwrap_or_default(),
            private_key_pem: fields.get("privateKeyPem").cloned().unwrap_or_default(),
            nonce: fields.get("nonce").cloned().unwrap_or_default(),
            expires_at,
            owning_instance: fields.get("owningInstance").cloned().unwrap_or_default(),
        }))
    }

    /// `true` if the token belongs to `credential` and hasn't
    /// expired; `Unauthenticated` maps cleanly to spec.md §4.G step 2
    /// item 1 ("absent or expired" / "credential mismatch" → 401).
    pub async fn verify_owner(&self, token: &str, credential: &Credential) -> RelayResult<HandshakeSummary> {
        let record = self.fetch(token).await?.ok_or(RelayError::Unauthenticated)?;
        if record.credential != credential.as_str() {
            return Err(RelayError::Unauthenticated);
        }
        Ok(HandshakeSummary {
            is_local: record.owning_instance == self.replica_id,
            destination_url: record.destination_url,
            world_name: record.world_name,
            username: record.username,
            nonce: record.nonce,
            private_key_pem: record.private_key_pem,
        })
    }

    /// Delete the handshake. Called before redemption proceeds so a
    /// second redemption attempt always sees it absent (spec.md §8
    /// invariant 6).
    pub async fn delete(&self, token: &str) -> RelayResult<()> {
        self.minted_locally.remove(token);
        self.store.delete(&handshake_key(token)).await.map_err(store_err)
    }
}

fn store_err(e: relay_store::StoreError) -> RelayError {
    RelayError::Internal(anyhow::anyhow!(e))
}

/// What [`HandshakeStore::verify_owner`] needs to hand back to the
/// caller without exposing the raw record type.
pub struct HandshakeSummary {
    /// `true` if this replica minted the handshake and may redeem it
    /// directly.
    pub is_local: bool,
    /// The world's `destinationUrl`, recorded at mint time.
    pub destination_url: String,
    /// The world name to select, if any, recorded at mint time.
    pub world_name: Option<String>,
    /// The username to log in as, recorded at mint time.
    pub username: String,
    /// The nonce the decrypted payload must echo.
    pub nonce: String,
    /// PEM private key, used to rebuild the keypair for decryption.
    pub private_key_pem: String,
}

#[cfg(test)]
mod tests {
    use relay_store::LocalStore;

    use super::*;

    #[tokio::test]
    async fn mint_then_verify_owner_round_trips_local() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let handshake_store = HandshakeStore::new(store, "replica-a".to_string());
        let credential = Credential::from("cred1".to_string());

        let minted = handshake_store.mint(&credential, "https://example.test/world", None, "alice").await.unwrap();
        let summary = handshake_store.verify_owner(&minted.token, &credential).await.unwrap();
        assert!(summary.is_local);
        assert_eq!(summary.nonce, minted.nonce);
    }

    #[tokio::test]
    async fn verify_owner_rejects_wrong_credential() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let handshake_store = HandshakeStore::new(store, "replica-a".to_string());
        let minted = handshake_store.mint(&Credential::from("cred1".to_string()), "https://example.test/world", None, "alice").await.unwrap();

        let result = handshake_store.verify_owner(&minted.token, &Credential::from("cred2".to_string())).await;
        assert!(matches!(result, Err(RelayError::Unauthenticated)));
    }

    #[tokio::test]
    async fn delete_makes_a_second_verify_see_it_absent() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let handshake_store = HandshakeStore::new(store, "replica-a".to_string());
        let credential = Credential::from("cred1".to_string());
        let minted = handshake_store.mint(&credential, "https://example.test/world", None, "alice").await.unwrap();

        handshake_store.delete(&minted.token).await.unwrap();
        let result = handshake_store.verify_owner(&minted.token, &credential).await;
        assert!(matches!(result, Err(RelayError::Unauthenticated)));
    }

    #[tokio::test]
    async fn is_local_false_when_minted_on_a_different_replica() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let minter = HandshakeStore::new(store.clone(), "replica-a".to_string());
        let redeemer = HandshakeStore::new(store, "replica-b".to_string());
        let credential = Credential::from("cred1".to_string());

        let minted = minter.mint(&credential, "https://example.test/world", None, "alice").await.unwrap();
        let summary = redeemer.verify_owner(&minted.token, &credential).await.unwrap();
        assert!(!summary.is_local);
    }

    #[tokio::test]
    async fn pending_and_result_round_trip_across_replicas() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let owner = HandshakeStore::new(store.clone(), "replica-a".to_string());
        let forwarder = HandshakeStore::new(store, "replica-b".to_string());
        let credential = Credential::from("cred1".to_string());
        let minted = owner.mint(&credential, "https://example.test/world", None, "alice").await.unwrap();

        forwarder.write_pending(&minted.token, &credential, "ciphertext").await.unwrap();
        let pending = owner.read_pending(&minted.token).await.unwrap().unwrap();
        assert_eq!(pending.credential, "cred1");
        assert_eq!(pending.encrypted_payload, "ciphertext");

        owner
            .write_result(&minted.token, &RedemptionResult { status: 200, body: serde_json::json!({"sessionId": "s1"}) })
            .await
            .unwrap();
        assert!(owner.read_pending(&minted.token).await.unwrap().is_none());
        let result = forwarder.read_result(&minted.token).await.unwrap().unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body["sessionId"], "s1");
    }

    #[tokio::test]
    async fn mint_tracks_token_locally_and_delete_forgets_it() {
        let store: std::sync::Arc<dyn CoordinationStore> = std::sync::Arc::new(LocalStore::new());
        let handshake_store = HandshakeStore::new(store, "replica-a".to_string());
        let minted = handshake_store.mint(&Credential::from("cred1".to_string()), "https://example.test/world", None, "alice").await.unwrap();

        assert!(handshake_store.locally_minted_tokens().contains(&minted.token));
        handshake_store.delete(&minted.token).await.unwrap();
        assert!(!handshake_store.locally_minted_tokens().contains(&minted.token));
    }
}
