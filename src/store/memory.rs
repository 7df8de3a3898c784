//! In-process key-value store for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{KeyValueStore, LockToken, StoreError};

/// How often lock waiters re-check a held lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct StoredValue {
    payload: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug)]
struct LockEntry {
    fencing: u64,
    expires_at: Instant,
}

/// A [`KeyValueStore`] backed by process memory.
///
/// Uses `tokio::time` for all expiry bookkeeping so tests can run it under
/// a paused clock. Lock waiters poll; with a handful of contenders per key
/// that is plenty, and it keeps the lock semantics identical to what a
/// networked store offers (no in-process wakeup channel to lean on).
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    counters: Mutex<HashMap<String, i64>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    next_fencing: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_lock(&self, name: &str, lease: Duration) -> Option<LockToken> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        let free = match locks.get(name) {
            None => true,
            Some(entry) => entry.expires_at <= now,
        };
        if !free {
            return None;
        }
        let fencing = self.next_fencing.fetch_add(1, Ordering::SeqCst);
        locks.insert(
            name.to_string(),
            LockEntry {
                fencing,
                expires_at: now + lease,
            },
        );
        Some(LockToken {
            name: name.to_string(),
            fencing,
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get(key) {
            Some(value) if value.expires_at > now => Ok(Some(value.payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        timeout: Duration,
    ) -> Result<LockToken, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(token) = self.try_lock(name, lease) {
                return Ok(token);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
            sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release(&self, token: LockToken) -> Result<(), StoreError> {
        let mut locks = self.locks.lock().unwrap();
        if let Some(entry) = locks.get(&token.name) {
            if entry.fencing == token.fencing {
                locks.remove(&token.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_set_with_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"payload".to_vec()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("hits").await.unwrap(), 1);
        assert_eq!(store.incr("hits").await.unwrap(), 2);
        assert_eq!(store.incr("misses").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_exclusion_and_release() {
        let store = MemoryStore::new();
        let token = store
            .acquire("lk", Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap();

        // A second acquire must time out while the lock is held.
        let err = store
            .acquire("lk", Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        store.release(token).await.unwrap();
        let token = store
            .acquire("lk", Duration::from_secs(60), Duration::from_secs(1))
            .await
            .unwrap();
        store.release(token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_lease_expiry_recovers() {
        let store = MemoryStore::new();
        let stale = store
            .acquire("lk", Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();

        // The holder "crashes"; the lease expires and the lock is re-granted.
        let token = store
            .acquire("lk", Duration::from_secs(5), Duration::from_secs(10))
            .await
            .unwrap();
        assert_ne!(stale.fencing, token.fencing);

        // The stale release must not free the new holder's lock.
        store.release(stale).await.unwrap();
        let err = store
            .acquire("lk", Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }
}
