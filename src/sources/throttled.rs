//! Throttling decorator: bounds the call rate into the wrapped source.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Publication;
use crate::sources::{PublicationStream, SourceCapabilities, SourceConnection, SourceError};
use crate::utils::throttle::RateLimiter;

/// Wraps a connection so every remote call first claims a slot from the
/// source's rate limiter.
///
/// For the streaming methods the claim stays attached to the returned
/// stream and is released when the stream is exhausted or dropped; a
/// paginated transfer counts as one throttled event from first to last
/// page. `assign_indexes` holds its claim for the duration of the call.
/// `close` is not throttled.
#[derive(Debug)]
pub struct ThrottledConnection {
    inner: Arc<dyn SourceConnection>,
    limiter: Arc<RateLimiter>,
}

impl ThrottledConnection {
    pub fn new(inner: Arc<dyn SourceConnection>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl SourceConnection for ThrottledConnection {
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
        let guard = self.limiter.acquire().await?;
        match self.inner.search_by_author(surname, given_name, year).await {
            Ok(stream) => Ok(stream.with_throttle_guard(guard)),
            Err(err) => {
                guard.release();
                Err(err)
            }
        }
    }

    async fn search_citations(
        &self,
        publications: &[Publication],
    ) -> Result<PublicationStream, SourceError> {
        let guard = self.limiter.acquire().await?;
        match self.inner.search_citations(publications).await {
            Ok(stream) => Ok(stream.with_throttle_guard(guard)),
            Err(err) => {
                guard.release();
                Err(err)
            }
        }
    }

    async fn assign_indexes(&self, publications: &mut [Publication]) -> Result<(), SourceError> {
        let guard = self.limiter.acquire().await?;
        let result = self.inner.assign_indexes(publications).await;
        guard.release();
        result
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.inner.close().await
    }
}
