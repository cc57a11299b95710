//! Redis-backed [`CoordinationStore`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::{StoreError, StoreResult};
use crate::store::CoordinationStore;

/// Lua script for the compare-and-delete lock-release primitive:
/// only deletes `key` if its current value is still the caller's
/// owner token (spec.md §8 invariant 7 — never release a lock a
/// different owner now holds).
const COMPARE_DELETE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

/// A Redis-backed coordination store using a multiplexed async
/// connection (auto-reconnecting, cheap to clone).
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis_url` and build a managed connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the initial connection
    /// fails.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn op_err(e: redis::RedisError) -> StoreError {
    StoreError::Operation(e.to_string())
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(op_err)?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(op_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await.map_err(op_err)?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await.map_err(op_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await.map_err(op_err)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(op_err)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1)));
        let reply: Option<String> = conn.set_options(key, value, opts).await.map_err(op_err)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(op_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await.map_err(op_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(op_err)?;
        Ok(())
    }

    async fn compare_delete(&self, key: &str, expected_value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(COMPARE_DELETE_SCRIPT);
        let deleted: i64 = script
            .key(key)
            .arg(expected_value)
            .invoke_async(&mut conn)
            .await
            .map_err(op_err)?;
        Ok(deleted == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let _: () = conn.expire(key, secs).await.map_err(op_err)?;
        Ok(())
    }
}
