//! Mock source connection for testing.

use async_stream::stream;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::{Publication, TaggedValue};
use crate::sources::{PublicationStream, SourceCapabilities, SourceConnection, SourceError};

/// A source connection returning predefined results.
///
/// Counts calls per method so decorator tests can assert how often the
/// underlying source was actually reached, and can be told to fail the
/// next call to exercise containment paths.
#[derive(Debug, Default)]
pub struct MockConnection {
    id: String,
    search_results: Mutex<Vec<Publication>>,
    citation_results: Mutex<Vec<Publication>>,
    indexes_to_assign: Mutex<Vec<TaggedValue>>,
    fail_next: Mutex<Option<String>>,
    search_calls: AtomicUsize,
    citation_calls: AtomicUsize,
    index_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockConnection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Publications returned by `search_by_author`.
    pub fn set_search_results(&self, publications: Vec<Publication>) {
        *self.search_results.lock().unwrap() = publications;
    }

    /// Publications returned by `search_citations`.
    pub fn set_citation_results(&self, publications: Vec<Publication>) {
        *self.citation_results.lock().unwrap() = publications;
    }

    /// Indexes appended to every publication by `assign_indexes`.
    pub fn set_indexes_to_assign(&self, indexes: Vec<TaggedValue>) {
        *self.indexes_to_assign.lock().unwrap() = indexes;
    }

    /// Make the next search or citation call fail as unavailable.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn citation_calls(&self) -> usize {
        self.citation_calls.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<SourceError> {
        self.fail_next
            .lock()
            .unwrap()
            .take()
            .map(SourceError::Unavailable)
    }
}

#[async_trait]
impl SourceConnection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::AUTHOR_SEARCH | SourceCapabilities::CITATIONS | SourceCapabilities::INDEXES
    }

    async fn search_by_author(
        &self,
        _surname: &str,
        _given_name: Option<&str>,
        _year: Option<i32>,
    ) -> Result<PublicationStream, SourceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let publications = self.search_results.lock().unwrap().clone();
        // Emit lazily, one record per poll, like a paginating provider.
        Ok(PublicationStream::new(stream! {
            for publication in publications {
                yield Ok(publication);
            }
        }))
    }

    async fn search_citations(
        &self,
        _publications: &[Publication],
    ) -> Result<PublicationStream, SourceError> {
        self.citation_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let publications = self.citation_results.lock().unwrap().clone();
        Ok(PublicationStream::from_vec(publications))
    }

    async fn assign_indexes(&self, publications: &mut [Publication]) -> Result<(), SourceError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let indexes = self.indexes_to_assign.lock().unwrap().clone();
        for publication in publications.iter_mut() {
            for index in &indexes {
                if !publication.indexes.contains(index) {
                    publication.indexes.push(index.clone());
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublicationBuilder;

    #[tokio::test]
    async fn test_returns_configured_results() {
        let mock = MockConnection::new("mock");
        mock.set_search_results(vec![PublicationBuilder::new("A").year(2020).build()]);

        let found = mock
            .search_by_author("Smith", None, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(mock.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_fails_once() {
        let mock = MockConnection::new("mock");
        mock.fail_next("down");

        assert!(mock.search_by_author("Smith", None, None).await.is_err());
        assert!(mock.search_by_author("Smith", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_assign_indexes_annotates_in_place() {
        let mock = MockConnection::new("mock");
        mock.set_indexes_to_assign(vec![TaggedValue::new("SCI")]);

        let mut publications = vec![PublicationBuilder::new("A").year(2020).build()];
        mock.assign_indexes(&mut publications).await.unwrap();
        assert_eq!(publications[0].indexes, vec![TaggedValue::new("SCI")]);
    }
}
