//! Distributed lock primitive: `(lockKey, ownerToken, ttl)` realized
//! as SET-if-absent with TTL, released by compare-and-delete
//! (spec.md §3, §8 invariant 7).

use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreResult;
use crate::store::CoordinationStore;

/// A lock held against a [`CoordinationStore`], identified by a
/// random owner token so a release can never drop a lock a different
/// holder has since acquired.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    owner_token: String,
}

impl DistributedLock {
    /// Attempt to acquire `key` for `ttl`. Returns `None` if another
    /// holder already owns it.
    pub async fn try_acquire(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> StoreResult<Option<Self>> {
        let key = key.into();
        let owner_token = random_owner_token();
        let acquired = store.set_nx(&key, &owner_token, ttl).await?;
        Ok(acquired.then_some(Self { store, key, owner_token }))
    }

    /// Release the lock. No-op (returns `false`) if some other holder
    /// now owns `key` — this is what makes release safe to call
    /// unconditionally even past the TTL.
    pub async fn release(self) -> StoreResult<bool> {
        self.store.compare_delete(&self.key, &self.owner_token).await
    }
}

fn random_owner_token() -> String {
    let bytes: [u8; 16] = std::array::from_fn(|_| fastrand::u8(..));
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalStore;

    #[tokio::test]
    async fn second_acquire_fails_while_first_holds_lock() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let first = DistributedLock::try_acquire(store.clone(), "monthly_reset_lock", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = DistributedLock::try_acquire(store.clone(), "monthly_reset_lock", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let lock = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(lock.release().await.unwrap());

        let reacquired = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn stale_lock_handle_cannot_release_a_new_holders_lock() {
        let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
        let stale = DistributedLock::try_acquire(store.clone(), "k", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let new_holder = DistributedLock::try_acquire(store.clone(), "k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        assert!(!stale.release().await.unwrap());
        assert!(new_holder.release().await.unwrap());
    }
}
