//! Registry assembling and holding the decorated source connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SourceConfig, SourceVariant};
use crate::sources::{
    CachedConnection, LoggedConnection, MockConnection, SourceConnection, ThrottledConnection,
};
use crate::store::KeyValueStore;
use crate::utils::cache::SingleFlightCache;
use crate::utils::throttle::RateLimiter;

bitflags::bitflags! {
    /// Capabilities a source connection can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const AUTHOR_SEARCH = 1 << 0;
        const CITATIONS = 1 << 1;
        const INDEXES = 1 << 2;
    }
}

/// Holds one long-lived decorated connection per configured source.
///
/// Each connection owns its rate limiter and cache namespace; both live as
/// long as the registry and are shared by every query. Variants are picked
/// by configuration, never by inheritance: the config names what to build
/// ("mock", or an externally registered provider), and the registry wraps
/// it in the decorator chain `Logged(Cached(Throttled(raw)))`.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    connections: HashMap<String, Arc<dyn SourceConnection>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration. Only built-in variants are
    /// constructed here; external provider connections are added with
    /// [`register_decorated`](Self::register_decorated).
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Self {
        let mut registry = Self::new();
        for source in &config.sources {
            match source.variant {
                SourceVariant::Mock => {
                    let raw: Arc<dyn SourceConnection> =
                        Arc::new(MockConnection::new(source.id.clone()));
                    registry.register_decorated(raw, source, Arc::clone(&store));
                }
                SourceVariant::External => {
                    // The provider crate registers this connection itself.
                    tracing::debug!(source = %source.id, "skipping external source, awaiting registration");
                }
            }
        }
        registry
    }

    /// Register a raw connection wrapped in the configured decorator chain.
    pub fn register_decorated(
        &mut self,
        raw: Arc<dyn SourceConnection>,
        config: &SourceConfig,
        store: Arc<dyn KeyValueStore>,
    ) {
        let mut connection = raw;

        let limiter = RateLimiter::new(config.throttle.to_throttle_config());
        connection = Arc::new(ThrottledConnection::new(connection, limiter));

        if config.cache.enabled {
            let cache = SingleFlightCache::new(
                Arc::clone(&store),
                format!("citefed:cache:{}", config.id),
            )
            .with_lock_bounds(
                Duration::from_secs(config.cache.lock_lease_seconds),
                Duration::from_secs(config.cache.lock_timeout_seconds),
            );
            connection = Arc::new(CachedConnection::new(
                connection,
                cache,
                Duration::from_secs(config.cache.ttl_seconds),
            ));
        }

        if config.log.enabled {
            connection = Arc::new(LoggedConnection::new(
                connection,
                store,
                format!("citefed:log:{}", config.id),
                Duration::from_secs(config.log.retention_seconds),
            ));
        }

        self.register(connection);
    }

    /// Register an already-assembled connection.
    pub fn register(&mut self, connection: Arc<dyn SourceConnection>) {
        self.connections
            .insert(connection.id().to_string(), connection);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceConnection>> {
        self.connections.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn SourceConnection>> {
        self.connections.values()
    }

    /// Connections supporting a specific capability.
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn SourceConnection>> {
        self.all()
            .filter(|connection| connection.capabilities().contains(capability))
            .collect()
    }

    /// Connections to fan author searches out to.
    pub fn author_search(&self) -> Vec<&Arc<dyn SourceConnection>> {
        self.with_capability(SourceCapabilities::AUTHOR_SEARCH)
    }

    /// Connections to fan citation searches out to.
    pub fn citations(&self) -> Vec<&Arc<dyn SourceConnection>> {
        self.with_capability(SourceCapabilities::CITATIONS)
    }

    /// Connections that can assign index memberships.
    pub fn indexes(&self) -> Vec<&Arc<dyn SourceConnection>> {
        self.with_capability(SourceCapabilities::INDEXES)
    }

    pub fn has(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection. Failures are contained per source.
    pub async fn close_all(&self) {
        for connection in self.connections.values() {
            if let Err(err) = connection.close().await {
                tracing::warn!(source = %connection.id(), error = %err, "close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;

    fn mock_config(ids: &[&str]) -> Config {
        let mut config = Config::default();
        config.sources = ids
            .iter()
            .map(|id| SourceConfig::mock(*id))
            .collect();
        config
    }

    #[test]
    fn test_from_config_builds_mock_sources() {
        let config = mock_config(&["alpha", "beta"]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let registry = SourceRegistry::from_config(&config, store);

        assert_eq!(registry.len(), 2);
        assert!(registry.has("alpha"));
        assert!(registry.has("beta"));
        assert!(!registry.has("gamma"));
    }

    #[test]
    fn test_capability_selection() {
        let config = mock_config(&["alpha"]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let registry = SourceRegistry::from_config(&config, store);

        // The mock supports all three capabilities; decorators forward them.
        assert_eq!(registry.author_search().len(), 1);
        assert_eq!(registry.citations().len(), 1);
        assert_eq!(registry.indexes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decorated_chain_serves_from_cache() {
        let config = mock_config(&["alpha"]);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let registry = SourceRegistry::from_config(&config, store);

        let connection = registry.get("alpha").unwrap();
        let first = connection
            .search_by_author("Smith", None, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let second = connection
            .search_by_author("Smith", None, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
