//! Caching decorator: collapses and caches identical queries.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Publication;
use crate::sources::{PublicationStream, SourceCapabilities, SourceConnection, SourceError};
use crate::utils::cache::SingleFlightCache;
use crate::utils::hash::content_hash;

/// Wraps a connection so `search_by_author` and `search_citations` go
/// through the single-flight cache.
///
/// The cache key is a content hash of the method name and the
/// canonicalized arguments, so the identical logical query from any
/// process maps to the same entry. The inner stream is fully materialized
/// before the payload is persisted, then re-emitted as a lazy stream;
/// nothing partial is ever cached. `assign_indexes` is side-effecting and
/// forwards uncached.
#[derive(Debug)]
pub struct CachedConnection {
    inner: Arc<dyn SourceConnection>,
    cache: SingleFlightCache,
    ttl: Duration,
}

impl CachedConnection {
    pub fn new(inner: Arc<dyn SourceConnection>, cache: SingleFlightCache, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl SourceConnection for CachedConnection {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.inner.capabilities()
    }

    async fn search_by_author(
        &self,
        surname: &str,
        given_name: Option<&str>,
        year: Option<i32>,
    ) -> Result<PublicationStream, SourceError> {
        let key = content_hash("search_by_author", &(surname, given_name, year))?;
        let publications = self
            .cache
            .get_or_compute(&key, self.ttl, || async {
                let stream = self
                    .inner
                    .search_by_author(surname, given_name, year)
                    .await?;
                stream.collect().await
            })
            .await?;
        Ok(PublicationStream::from_vec(publications))
    }

    async fn search_citations(
        &self,
        publications: &[Publication],
    ) -> Result<PublicationStream, SourceError> {
        let key = content_hash("search_citations", &publications)?;
        let cited = self
            .cache
            .get_or_compute(&key, self.ttl, || async {
                let stream = self.inner.search_citations(publications).await?;
                stream.collect().await
            })
            .await?;
        Ok(PublicationStream::from_vec(cited))
    }

    async fn assign_indexes(&self, publications: &mut [Publication]) -> Result<(), SourceError> {
        self.inner.assign_indexes(publications).await
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.inner.close().await
    }
}
