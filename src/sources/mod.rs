//! Federated source connections and their decorator chain.
//!
//! Every external bibliographic source is reached through a
//! [`SourceConnection`]: a fixed capability set implemented by per-provider
//! crates (external collaborators) and by the in-crate [`MockConnection`]
//! test double. Cross-cutting concerns are layered on as decorators that
//! implement the same trait and forward:
//!
//! - [`ThrottledConnection`] bounds the call rate with a sliding-window
//!   limiter,
//! - [`CachedConnection`] collapses and caches identical queries through
//!   the single-flight cache,
//! - [`LoggedConnection`] records every request and its full raw result
//!   for audit.
//!
//! The [`SourceRegistry`] assembles the chain for each configured source:
//! `Logged(Cached(Throttled(raw)))`, so cache hits skip the throttle and
//! the log still sees every call.

mod cached;
mod logged;
pub mod mock;
mod registry;
mod stream;
mod throttled;

pub use cached::CachedConnection;
pub use logged::{request_log_key, LoggedConnection, RequestLogRecord};
pub use mock::MockConnection;
pub use registry::{SourceCapabilities, SourceRegistry};
pub use stream::PublicationStream;
pub use throttled::ThrottledConnection;

use async_trait::async_trait;

use crate::models::Publication;
use crate::utils::throttle::ThrottleTimeout;

/// The fixed capability set every federated source exposes.
///
/// Implementations must be safe to share across tasks; the registry hands
/// out `Arc<dyn SourceConnection>` for the process lifetime. `close()`
/// releases provider resources (sessions, sockets) and ends the scope of
/// the connection.
#[async_trait]
pub trait SourceConnection: Send + Sync + std::fmt::Debug {
    /// Unique identifier of this source ("scopus", "wok", ...)
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// What this source can do; drives registry fan-out selection.
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::AUTHOR_SEARCH
    }

    /// Publications by an author.
    ///
    /// The surname is matched exactly by the provider; `given_name` is a
    /// prefix ("T" also finds "Tomas"); `year` restricts to one year.
    async fn search_by_author(
        &self,
        _surname: &str,
        _given_name: Option<&str>,
        _year: Option<i32>,
    ) -> Result<PublicationStream, SourceError> {
        Err(SourceError::NotSupported)
    }

    /// Publications citing any of `publications`.
    async fn search_citations(
        &self,
        _publications: &[Publication],
    ) -> Result<PublicationStream, SourceError> {
        Err(SourceError::NotSupported)
    }

    /// Determine which citation indexes list each publication and annotate
    /// it in place.
    async fn assign_indexes(&self, _publications: &mut [Publication]) -> Result<(), SourceError> {
        Err(SourceError::NotSupported)
    }

    /// Release resources held by this connection.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Errors that can occur when talking to a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The operation is not part of this source's capability set
    #[error("operation not supported by this source")]
    NotSupported,

    /// Malformed query, rejected before any source was contacted
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No throttle slot became available in time; retryable
    #[error("throttle timeout: {0}")]
    ThrottleTimeout(#[from] ThrottleTimeout),

    /// The single-flight cache lock was not obtained in time; retryable
    #[error("cache lock timeout for key {0}")]
    CacheLockTimeout(String),

    /// The source is down or unreachable; contained to that source
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Network-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The provider's response could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Payload (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The shared key-value store failed
    #[error("store error: {0}")]
    Store(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::ThrottleTimeout(_)
                | SourceError::CacheLockTimeout(_)
                | SourceError::Unavailable(_)
                | SourceError::Network(_)
        )
    }
}

impl From<crate::utils::cache::CacheError> for SourceError {
    fn from(err: crate::utils::cache::CacheError) -> Self {
        use crate::utils::cache::CacheError;
        match err {
            CacheError::LockTimeout { key } => SourceError::CacheLockTimeout(key),
            CacheError::Serialization(err) => SourceError::Serialization(err.to_string()),
            CacheError::Store(err) => SourceError::Store(err.to_string()),
            CacheError::Compute(err) => err,
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Serialization(err.to_string())
    }
}
