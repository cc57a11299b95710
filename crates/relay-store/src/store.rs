//! The [`CoordinationStore`] trait.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// A key-value store with hashes, sets, TTL expiry, SET-if-absent,
/// and compare-and-delete, as used by every cross-replica component
/// (spec.md §3 "Coordination Keys", §4.A).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set one field in a hash at `key`.
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Read all fields of a hash at `key`.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Remove one field from a hash at `key`.
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()>;

    /// Add a member to a set at `key`.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Remove a member from a set at `key`. Removing the last member
    /// removes the set itself (spec.md §3 Credential Group invariant).
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Read all members of a set at `key`.
    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>>;

    /// Set `key` to `value` only if absent, with a TTL. Returns
    /// `true` if the set happened (lock/lease acquired).
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Read a plain string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a plain string value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete a key unconditionally.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Delete `key` only if its current value equals `expected_value`.
    /// Returns `true` if the delete happened. Used to release a
    /// distributed lock without releasing a lock someone else now
    /// owns (spec.md §8 invariant 7).
    async fn compare_delete(&self, key: &str, expected_value: &str) -> StoreResult<bool>;

    /// Refresh a key's TTL without changing its value.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;
}
