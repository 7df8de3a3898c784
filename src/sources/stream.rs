//! The lazy publication stream flowing out of source connections.

use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::models::Publication;
use crate::sources::SourceError;
use crate::utils::throttle::ThrottleGuard;

/// A finite, non-restartable sequence of publications.
///
/// Providers that paginate can begin emitting before the last page is
/// fetched; consumers therefore must not assume the whole result exists
/// when the first item arrives. The stream is consumed by polling; once it
/// returns `None` it stays exhausted, and there is no way to rewind.
///
/// Decorators that need the entire sequence (cache, log) call
/// [`collect`](Self::collect) to materialize it, persist the buffer, and
/// re-emit it with [`from_vec`](Self::from_vec) so downstream consumers
/// still see a lazy stream.
pub struct PublicationStream {
    inner: Pin<Box<dyn Stream<Item = Result<Publication, SourceError>> + Send>>,
}

impl PublicationStream {
    /// Wrap any stream of publication results.
    pub fn new(
        stream: impl Stream<Item = Result<Publication, SourceError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream over an already-materialized buffer.
    pub fn from_vec(publications: Vec<Publication>) -> Self {
        Self::new(stream::iter(publications.into_iter().map(Ok)))
    }

    /// The empty stream.
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Attach a throttle guard to this stream; it is released when the
    /// stream is exhausted or dropped, so the throttled resource stays
    /// covered for the whole transfer.
    pub fn with_throttle_guard(self, guard: ThrottleGuard) -> Self {
        Self::new(GuardedStream {
            inner: self,
            guard: Some(guard),
        })
    }

    /// Drain the stream into a vector, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Publication>, SourceError> {
        let mut publications = Vec::new();
        while let Some(item) = self.inner.next().await {
            publications.push(item?);
        }
        Ok(publications)
    }
}

impl Stream for PublicationStream {
    type Item = Result<Publication, SourceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for PublicationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PublicationStream")
    }
}

/// Holds a throttle guard open until the underlying stream finishes.
struct GuardedStream {
    inner: PublicationStream,
    guard: Option<ThrottleGuard>,
}

impl Stream for GuardedStream {
    type Item = Result<Publication, SourceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                if let Some(guard) = this.guard.take() {
                    guard.release();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
