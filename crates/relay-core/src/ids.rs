//! Newtype identifiers used across the relay.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a world's socket connection, `clientId` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldId(pub String);

impl WorldId {
    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorldId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorldId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The 16-byte hex API key identifying a user; also the fan-out
/// broadcast grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential(pub String);

impl Credential {
    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for logging without exposing the full key.
    #[must_use]
    pub fn redacted_prefix(&self) -> String {
        self.0.chars().take(8).collect::<String>() + "…"
    }

    /// Generate a fresh 16-byte hex credential.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 16] = std::array::from_fn(|_| fastrand::u8(..));
        Self(hex_encode(&bytes))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted_prefix())
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies one replica process. Defaults to `"local"` when
/// `FLY_ALLOC_ID` is unset (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    /// Resolve this replica's identity from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self(std::env::var("FLY_ALLOC_ID").unwrap_or_else(|_| "local".to_string()))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short, unique per-request correlation id: `"<kind>_<unix-ms>_<9-char-base36>"`.
///
/// The kind prefix is advisory only — dispatch relies on the
/// registered waiter's recorded kind, never on parsing this string
/// (spec.md §4.D).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Mint a new correlation id for the given reply-kind prefix.
    #[must_use]
    pub fn generate(kind_prefix: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix = random_base36(9);
        Self(format!("{kind_prefix}_{millis}_{suffix}"))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    (0..len)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_generate_is_32_hex_chars() {
        let c = Credential::generate();
        assert_eq!(c.0.len(), 32);
        assert!(c.0.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn credential_redacted_prefix_never_leaks_full_key() {
        let c = Credential::from("abcdef0123456789abcdef0123456789".to_string());
        let redacted = c.redacted_prefix();
        assert!(redacted.len() < c.0.len());
        assert!(!redacted.contains("0123456789abcdef0123456789"));
    }

    #[test]
    fn replica_id_defaults_to_local() {
        // SAFETY-free: just reads the env var, doesn't need to be unset here
        // since CI/test environments generally don't set FLY_ALLOC_ID.
        if std::env::var("FLY_ALLOC_ID").is_err() {
            assert_eq!(ReplicaId::from_env().as_str(), "local");
        }
    }

    #[test]
    fn correlation_id_carries_kind_prefix_and_is_unique() {
        let a = CorrelationId::generate("search");
        let b = CorrelationId::generate("search");
        assert!(a.as_str().starts_with("search_"));
        assert_ne!(a, b);
    }
}
