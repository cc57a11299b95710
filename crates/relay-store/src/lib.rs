//! Relay Store — the Coordination Store Adapter (spec.md §2 row A,
//! §3 "Coordination Keys", §4.A).
//!
//! A thin facade over a key-value store offering hashes, sets, TTL
//! expiry, atomic SET-if-absent, and a compare-and-delete primitive
//! used for distributed locks. Two tiers:
//!
//! - [`RedisStore`] — a real Redis-backed implementation, used when
//!   `REDIS_URL` is configured.
//! - [`LocalStore`] — an in-process fallback used for single-instance
//!   deployments, and the degraded mode the gateway falls back to
//!   (logged, not fatal) when Redis is unreachable.
//!
//! [`DistributedLock`] wraps `set_nx`/`compare_delete` to realize the
//! `(lockKey, ownerToken, ttl)` primitive from spec.md §3.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]

mod error;
mod local;
mod lock;
mod redis_store;
mod store;

pub use error::{StoreError, StoreResult};
pub use local::LocalStore;
pub use lock::DistributedLock;
pub use redis_store::RedisStore;
pub use store::CoordinationStore;
