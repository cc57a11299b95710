//! In-process coordination store fallback.
//!
//! Used for single-instance deployments (`REDIS_URL` unset) and as
//! the degraded mode a [`crate::RedisStore`] caller can fall back to
//! when Redis is unreachable — failures there are logged at `warn`,
//! never fatal (spec.md §2 row A).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreResult;
use crate::store::CoordinationStore;

#[derive(Clone)]
enum Entry {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Value(String),
}

struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// An in-process `DashMap`-backed store. Each top-level key owns a
/// fine-grained lock via `DashMap`'s sharding (spec.md §5's
/// "never a single global lock" requirement).
pub struct LocalStore {
    data: DashMap<String, Slot>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Sweep and drop every expired slot. Intended to run on a
    /// periodic background tick; `CoordinationStore` methods also
    /// lazily treat an expired slot as absent, so the sweep is purely
    /// for memory reclamation, not correctness.
    pub fn sweep_expired(&self) {
        self.data.retain(|_, slot| slot.is_live());
    }

    fn get_live_entry(&self, key: &str) -> Option<Entry> {
        self.data.get(key).and_then(|slot| slot.is_live().then(|| slot.entry.clone()))
    }
}

#[async_trait]
impl CoordinationStore for LocalStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut slot = self.data.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.entry {
            Entry::Hash(map) => {
                map.insert(field.to_string(), value.to_string());
            },
            _ => slot.entry = Entry::Hash(HashMap::from([(field.to_string(), value.to_string())])),
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(match self.get_live_entry(key) {
            Some(Entry::Hash(map)) => map,
            _ => HashMap::new(),
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        if let Some(mut slot) = self.data.get_mut(key) {
            if let Entry::Hash(map) = &mut slot.entry {
                map.remove(field);
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut slot = self.data.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut slot.entry {
            Entry::Set(set) => {
                set.insert(member.to_string());
            },
            _ => slot.entry = Entry::Set(HashSet::from([member.to_string()])),
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut remove_key = false;
        if let Some(mut slot) = self.data.get_mut(key) {
            if let Entry::Set(set) = &mut slot.entry {
                set.remove(member);
                remove_key = set.is_empty();
            }
        }
        if remove_key {
            self.data.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        Ok(match self.get_live_entry(key) {
            Some(Entry::Set(set)) => set,
            _ => HashSet::new(),
        })
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        if self.get_live_entry(key).is_some() {
            return Ok(false);
        }
        self.data.insert(
            key.to_string(),
            Slot { entry: Entry::Value(value.to_string()), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(match self.get_live_entry(key) {
            Some(Entry::Value(v)) => Some(v),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.data.insert(
            key.to_string(),
            Slot { entry: Entry::Value(value.to_string()), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn compare_delete(&self, key: &str, expected_value: &str) -> StoreResult<bool> {
        let matches = matches!(self.get_live_entry(key), Some(Entry::Value(v)) if v == expected_value);
        if matches {
            self.data.remove(key);
        }
        Ok(matches)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if let Some(mut slot) = self.data.get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let store = LocalStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.get("a"), Some(&"1".to_string()));
        store.hdel("h", "a").await.unwrap();
        let all = store.hgetall("h").await.unwrap();
        assert!(!all.contains_key("a"));
    }

    #[tokio::test]
    async fn set_add_remove_drops_empty_set() {
        let store = LocalStore::new();
        store.sadd("s", "w1").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap().len(), 1);
        store.srem("s", "w1").await.unwrap();
        assert!(store.smembers("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_nx_only_succeeds_once_until_expiry() {
        let store = LocalStore::new();
        assert!(store.set_nx("lock", "owner-a", Duration::from_millis(50)).await.unwrap());
        assert!(!store.set_nx("lock", "owner-b", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.set_nx("lock", "owner-b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn compare_delete_only_deletes_matching_owner() {
        let store = LocalStore::new();
        store.set("lock", "owner-a", Duration::from_secs(5)).await.unwrap();
        assert!(!store.compare_delete("lock", "owner-b").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());
        assert!(store.compare_delete("lock", "owner-a").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_expired_reclaims_expired_slots() {
        let store = LocalStore::new();
        store.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.sweep_expired();
        assert_eq!(store.data.len(), 0);
    }
}
