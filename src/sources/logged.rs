//! Logging decorator: records every request and its raw result for audit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Publication;
use crate::sources::{PublicationStream, SourceCapabilities, SourceConnection, SourceError};
use crate::store::KeyValueStore;
use crate::utils::hash::content_hash;

/// One audited source call: what was asked, what came back, and when.
///
/// Retrievable from the store under [`request_log_key`] with the same
/// content hash the cache uses for the call, so an audit UI can jump from
/// a cache entry to the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRecord {
    /// Method name ("search_by_author", ...)
    pub method: String,

    /// Canonicalized arguments, stably ordered
    pub args: Value,

    /// Full raw result payload
    pub result: Value,

    /// When the call completed
    pub timestamp: DateTime<Utc>,
}

/// Store key of the log record for `hash` within `namespace`.
pub fn request_log_key(namespace: &str, hash: &str) -> String {
    format!("{}:{}:request", namespace, hash)
}

/// Wraps a connection and persists a [`RequestLogRecord`] for every search
/// call, without altering the stream: the inner stream is materialized,
/// the record written, and the buffered copy re-emitted.
///
/// Log persistence is best-effort; a store failure is logged and the call
/// still succeeds.
#[derive(Debug)]
pub struct LoggedConnection {
    inner: Arc<dyn SourceConnection>,
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    retention: Duration,
}

impl LoggedConnection {
    pub fn new(
        inner: Arc<dyn SourceConnection>,
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            inner,
            store,
            namespace: namespace.into(),
            retention,
        }
    }

    async fn record<A: Serialize>(&self, method: &str, args: &A, result: &[Publication]) {
        let record = match (serde_json::to_value(args), serde_json::to_value(result)) {
            (Ok(args), Ok(result)) => RequestLogRecord {
                method: method.to_string(),
                args,
                result,
                timestamp: Utc::now(),
            },
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(source = %self.inner.id(), method, error = %err, "request log encode failed");
                return;
            }
        };

        let hash = match content_hash(method, &record.args) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(source = %self.inner.id(), method, error = %err, "request log key failed");
                return;
            }
        };
        let key = request_log_key(&self.namespace, &hash);

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(source = %self.inner.id(), method, error = %err, "request log encode failed");
                return;
            }
        };
        if let Err(err) = self.store.set(&key, payload, self.retention).await {
            tracing::warn!(source = %self.inner.id(), method, error = %err, "request log write failed");
        }
    }
}

#[async_trait]
impl SourceConnection for LoggedConnection {
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
        tracing::debug!(source = %self.inner.id(), surname, ?given_name, ?year, "search_by_author");
        let stream = self
            .inner
            .search_by_author(surname, given_name, year)
            .await?;
        let publications = stream.collect().await?;
        tracing::info!(source = %self.inner.id(), results = publications.len(), "search_by_author done");
        self.record("search_by_author", &(surname, given_name, year), &publications)
            .await;
        Ok(PublicationStream::from_vec(publications))
    }

    async fn search_citations(
        &self,
        publications: &[Publication],
    ) -> Result<PublicationStream, SourceError> {
        tracing::debug!(source = %self.inner.id(), seeds = publications.len(), "search_citations");
        let stream = self.inner.search_citations(publications).await?;
        let cited = stream.collect().await?;
        tracing::info!(source = %self.inner.id(), results = cited.len(), "search_citations done");
        self.record("search_citations", &publications, &cited).await;
        Ok(PublicationStream::from_vec(cited))
    }

    async fn assign_indexes(&self, publications: &mut [Publication]) -> Result<(), SourceError> {
        tracing::debug!(source = %self.inner.id(), count = publications.len(), "assign_indexes");
        let before: Vec<Publication> = publications.to_vec();
        self.inner.assign_indexes(publications).await?;
        self.record("assign_indexes", &before, &*publications).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.inner.close().await
    }
}
