//! Single-flight cache-aside over the shared key-value store.
//!
//! `get_or_compute` collapses concurrent identical computations: the first
//! caller to miss takes a distributed lock, computes, and persists; everyone
//! else waits behind the lock and then reads the stored result. Because the
//! lock lives in the shared store, the at-most-one-computation guarantee
//! holds across processes, not just within this one.
//!
//! # Key layout
//!
//! ```text
//! <namespace>:<key>:data   serialized payload, expires after the entry TTL
//! <namespace>:<key>:lock   single-flight lock, bounded by the lease
//! <namespace>:hits         hit counter
//! <namespace>:misses       miss counter
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::sources::SourceError;
use crate::store::{KeyValueStore, LockToken, StoreError};

/// Lease on the single-flight lock; a crashed holder frees the key after
/// this long.
const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(15 * 60);

/// How long a caller waits behind another holder before giving up.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Errors from a single cache lookup.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The single-flight lock was not obtained before the acquire timeout.
    /// Retryable; the caller may also fall back to an uncached fetch.
    #[error("cache lock for '{key}' not acquired in time")]
    LockTimeout { key: String },

    /// Payload could not be encoded or decoded. Fatal for this call only.
    #[error("cache payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The wrapped computation failed; passed through untouched.
    #[error(transparent)]
    Compute(SourceError),
}

/// Cache-aside with a distributed exclusive lock per key.
///
/// One instance per (source, method) namespace, constructed by the registry
/// and shared via `Arc` for the process lifetime.
#[derive(Debug, Clone)]
pub struct SingleFlightCache {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    lock_lease: Duration,
    lock_timeout: Duration,
}

impl SingleFlightCache {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            lock_lease: DEFAULT_LOCK_LEASE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the lock lease and acquire timeout.
    pub fn with_lock_bounds(mut self, lease: Duration, timeout: Duration) -> Self {
        self.lock_lease = lease;
        self.lock_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}:{}:data", self.namespace, key)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:{}:lock", self.namespace, key)
    }

    /// Look up `key`; on a miss, run `compute` under the distributed lock
    /// and persist its result with `ttl`.
    ///
    /// At most one `compute` runs per key across the whole deployment.
    /// Callers that lose the race block behind the lock (bounded by the
    /// acquire timeout) and then re-read the store instead of recomputing.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let data_key = self.data_key(key);

        if let Some(payload) = self.store.get(&data_key).await? {
            self.count("hits").await;
            tracing::debug!(namespace = %self.namespace, key, "cache hit");
            return Ok(serde_json::from_slice(&payload)?);
        }

        let token = match self
            .store
            .acquire(&self.lock_key(key), self.lock_lease, self.lock_timeout)
            .await
        {
            Ok(token) => token,
            Err(StoreError::LockTimeout { .. }) => {
                return Err(CacheError::LockTimeout {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        // Someone else may have computed and stored while we were waiting
        // for the lock.
        match self.store.get(&data_key).await {
            Ok(Some(payload)) => {
                self.unlock(token).await;
                self.count("hits").await;
                tracing::debug!(namespace = %self.namespace, key, "cache hit after lock wait");
                return Ok(serde_json::from_slice(&payload)?);
            }
            Ok(None) => {}
            Err(err) => {
                self.unlock(token).await;
                return Err(err.into());
            }
        }

        self.count("misses").await;
        tracing::debug!(namespace = %self.namespace, key, "cache miss, computing");

        let value = match compute().await {
            Ok(value) => value,
            Err(err) => {
                self.unlock(token).await;
                return Err(CacheError::Compute(err));
            }
        };

        let payload = match serde_json::to_vec(&value) {
            Ok(payload) => payload,
            Err(err) => {
                self.unlock(token).await;
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.set(&data_key, payload, ttl).await {
            self.unlock(token).await;
            return Err(err.into());
        }

        self.unlock(token).await;
        Ok(value)
    }

    async fn unlock(&self, token: LockToken) {
        if let Err(err) = self.store.release(token).await {
            tracing::warn!(namespace = %self.namespace, error = %err, "cache lock release failed");
        }
    }

    /// Hit/miss counters are best-effort; a counter failure never fails the
    /// lookup.
    async fn count(&self, which: &str) {
        let counter_key = format!("{}:{}", self.namespace, which);
        if let Err(err) = self.store.incr(&counter_key).await {
            tracing::debug!(namespace = %self.namespace, error = %err, "cache counter failed");
        }
    }
}
