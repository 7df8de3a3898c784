//! Shared key-value store abstraction used by the cache, the single-flight
//! lock, and the request log.
//!
//! The trait mirrors the small subset of a Redis-style store the crate
//! needs: byte payloads with TTLs, counters, and a mutual-exclusion
//! primitive with a lease. Correctness of the single-flight cache depends on
//! the lock living in the *shared* store, so that it excludes callers in
//! other processes, not just other tasks in this one.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and
//! single-process deployments; a networked adapter (e.g. Redis) is an
//! external collaborator implementing the same trait.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;

/// Proof of lock ownership, returned by [`KeyValueStore::acquire`].
///
/// The fencing id distinguishes the current holder from a holder whose
/// lease expired and whose lock was re-granted; a stale release must not
/// free the new holder's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// Name of the lock this token belongs to
    pub name: String,

    /// Monotonic fencing id of this grant
    pub fencing: u64,
}

/// Errors surfaced by a key-value store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The lock could not be acquired before the acquire timeout elapsed.
    /// Retryable: the holder may finish, or its lease may expire.
    #[error("lock '{name}' not acquired within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    /// The backend itself failed (connection loss, protocol error, ...)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The store interface consumed by the cache, lock, and log layers.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Fetch the payload stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment the counter at `key`, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Acquire the named exclusive lock.
    ///
    /// The lock is held until [`release`](Self::release) or until `lease`
    /// elapses, whichever comes first; the lease bounds the damage of a
    /// crashed holder. Waits at most `timeout` before failing with
    /// [`StoreError::LockTimeout`].
    async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        timeout: Duration,
    ) -> Result<LockToken, StoreError>;

    /// Release a held lock. Releasing an expired or superseded token is a
    /// no-op.
    async fn release(&self, token: LockToken) -> Result<(), StoreError>;
}
