//! The aggregation pipeline: fan-out, filter, merge, order.
//!
//! Each call is independent and stateless beyond the shared rate-limiter
//! and cache state living inside the registry's connections. A single
//! source failing is contained at this boundary: it contributes nothing
//! and its failure is annotated on the result, so callers get partial
//! results instead of an exception.

use futures_util::future;
use std::sync::Arc;

use crate::models::{AggregateResult, Author, Publication, SourceFailure};
use crate::sources::{SourceConnection, SourceError, SourceRegistry};
use crate::utils::merge::{authors_equivalent, merge_publications, normalize_surname};

/// Fans queries out across every configured decorated connection.
#[derive(Debug, Clone)]
pub struct AggregationPipeline {
    registry: Arc<SourceRegistry>,
}

impl AggregationPipeline {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Search every author-capable source, merge duplicates, and order the
    /// result by year descending, then first-author surname; records with
    /// no authors sort last within their year.
    pub async fn search_by_author(
        &self,
        surname: &str,
        given_name: Option<&str>,
        year: Option<i32>,
    ) -> Result<AggregateResult, SourceError> {
        let surname = surname.trim();
        if surname.is_empty() {
            return Err(SourceError::InvalidRequest(
                "surname must not be empty".to_string(),
            ));
        }
        if let Some(year) = year {
            if !(0..=9999).contains(&year) {
                return Err(SourceError::InvalidRequest(format!(
                    "implausible year: {}",
                    year
                )));
            }
        }
        let given_name = given_name.map(str::trim).filter(|name| !name.is_empty());

        let connections = self.registry.author_search();
        tracing::info!(surname, ?given_name, ?year, sources = connections.len(), "author search fan-out");

        let calls = connections.into_iter().map(|connection| {
            let connection = Arc::clone(connection);
            async move {
                let outcome = match connection.search_by_author(surname, given_name, year).await {
                    Ok(stream) => stream.collect().await,
                    Err(err) => Err(err),
                };
                (connection.id().to_string(), outcome)
            }
        });

        let (collected, failures) = Self::gather(future::join_all(calls).await);
        let mut publications = merge_publications(collected);

        publications.sort_by(|a, b| {
            b.year
                .cmp(&a.year)
                .then_with(|| a.authors.is_empty().cmp(&b.authors.is_empty()))
                .then_with(|| {
                    let a_surname = a.first_author_surname().map(normalize_surname);
                    let b_surname = b.first_author_surname().map(normalize_surname);
                    a_surname.cmp(&b_surname)
                })
        });

        Ok(AggregateResult::new(publications, failures))
    }

    /// Find works citing any of `seeds`, drop autocitations (anything
    /// sharing an author with the seed set), merge, and order by year
    /// ascending then first-author surname.
    pub async fn search_citations(
        &self,
        seeds: &[Publication],
    ) -> Result<AggregateResult, SourceError> {
        if seeds.is_empty() {
            return Err(SourceError::InvalidRequest(
                "at least one publication is required".to_string(),
            ));
        }

        let connections = self.registry.citations();
        tracing::info!(seeds = seeds.len(), sources = connections.len(), "citation search fan-out");

        let calls = connections.into_iter().map(|connection| {
            let connection = Arc::clone(connection);
            async move {
                let outcome = match connection.search_citations(seeds).await {
                    Ok(stream) => stream.collect().await,
                    Err(err) => Err(err),
                };
                (connection.id().to_string(), outcome)
            }
        });

        let (collected, failures) = Self::gather(future::join_all(calls).await);

        let seed_authors: Vec<&Author> = seeds.iter().flat_map(|seed| &seed.authors).collect();
        let (autocitations, citing): (Vec<_>, Vec<_>) = collected
            .into_iter()
            .partition(|publication| is_autocitation(publication, &seed_authors));
        if !autocitations.is_empty() {
            tracing::debug!(dropped = autocitations.len(), "autocitations filtered");
        }

        let mut publications = merge_publications(citing);
        publications.sort_by(|a, b| {
            a.year
                .cmp(&b.year)
                .then_with(|| a.authors.is_empty().cmp(&b.authors.is_empty()))
                .then_with(|| {
                    let a_surname = a.first_author_surname().map(normalize_surname);
                    let b_surname = b.first_author_surname().map(normalize_surname);
                    a_surname.cmp(&b_surname)
                })
        });

        Ok(AggregateResult::new(publications, failures))
    }

    /// Let every index-capable source annotate the publications in place.
    ///
    /// Sources run one after another since each mutates the same records.
    /// Failures are contained per source and reported back.
    pub async fn assign_indexes(
        &self,
        publications: &mut [Publication],
    ) -> Result<Vec<SourceFailure>, SourceError> {
        let mut failures = Vec::new();
        for connection in self.registry.indexes() {
            if let Err(err) = connection.assign_indexes(publications).await {
                tracing::warn!(source = %connection.id(), error = %err, "assign_indexes failed");
                for publication in publications.iter_mut() {
                    publication.annotate_error(format!("{}: {}", connection.id(), err));
                }
                failures.push(SourceFailure::new(connection.id(), err.to_string()));
            }
        }
        Ok(failures)
    }

    /// Split fan-out outcomes into contributions and contained failures.
    fn gather(
        outcomes: Vec<(String, Result<Vec<Publication>, SourceError>)>,
    ) -> (Vec<Publication>, Vec<SourceFailure>) {
        let mut publications = Vec::new();
        let mut failures = Vec::new();
        for (source, outcome) in outcomes {
            match outcome {
                Ok(contribution) => publications.extend(contribution),
                Err(err) => {
                    tracing::warn!(source = %source, error = %err, "source failed, continuing without it");
                    failures.push(SourceFailure::new(source, err.to_string()));
                }
            }
        }
        (publications, failures)
    }
}

/// A citing record is an autocitation when it shares at least one author
/// with the seed set.
fn is_autocitation(publication: &Publication, seed_authors: &[&Author]) -> bool {
    publication.authors.iter().any(|author| {
        seed_authors
            .iter()
            .any(|seed| authors_equivalent(author, seed))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::models::PublicationBuilder;
    use crate::sources::mock::MockConnection;
    use crate::store::{KeyValueStore, MemoryStore};

    fn author(surname: &str, names: &[&str]) -> Author {
        Author::new(surname, names.iter().map(|n| n.to_string()).collect())
    }

    struct Fixture {
        mocks: Vec<Arc<MockConnection>>,
        pipeline: AggregationPipeline,
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut registry = SourceRegistry::new();
        let mut mocks = Vec::new();
        for id in ids {
            let mock = Arc::new(MockConnection::new(*id));
            registry.register_decorated(
                Arc::clone(&mock) as Arc<dyn SourceConnection>,
                &SourceConfig::mock(*id),
                Arc::clone(&store),
            );
            mocks.push(mock);
        }
        Fixture {
            mocks,
            pipeline: AggregationPipeline::new(Arc::new(registry)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_merges_across_sources() {
        let fixture = fixture(&["alpha", "beta"]);
        fixture.mocks[0].set_search_results(vec![PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .pages("1-5")
            .build()]);
        fixture.mocks[1].set_search_results(vec![PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["John"]))
            .year(2010)
            .published_in("J. Algo")
            .build()]);

        let result = fixture
            .pipeline
            .search_by_author("Smith", None, None)
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.publications.len(), 1);
        let canonical = &result.publications[0];
        assert_eq!(canonical.pages.as_deref(), Some("1-5"));
        assert_eq!(canonical.published_in.as_deref(), Some("J. Algo"));
        assert_eq!(canonical.merge_sources.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_source_failing_is_contained() {
        let fixture = fixture(&["alpha", "beta"]);
        fixture.mocks[0].set_search_results(vec![PublicationBuilder::new("Survives")
            .author(author("Smith", &["J."]))
            .year(2015)
            .build()]);
        fixture.mocks[1].fail_next("session expired");

        let result = fixture
            .pipeline
            .search_by_author("Smith", None, None)
            .await
            .unwrap();

        assert_eq!(result.publications.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].source, "beta");
    }

    #[tokio::test(start_paused = true)]
    async fn test_author_search_ordering() {
        let fixture = fixture(&["alpha"]);
        fixture.mocks[0].set_search_results(vec![
            PublicationBuilder::new("Old")
                .author(author("Brown", &[]))
                .year(2001)
                .build(),
            PublicationBuilder::new("Newer by Zobel")
                .author(author("Zobel", &[]))
                .year(2010)
                .build(),
            PublicationBuilder::new("Newer by Adams")
                .author(author("Adams", &[]))
                .year(2010)
                .build(),
            PublicationBuilder::new("Newer, no authors").year(2010).build(),
        ]);

        let result = fixture
            .pipeline
            .search_by_author("Smith", None, None)
            .await
            .unwrap();

        let titles: Vec<&str> = result
            .publications
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(
            titles,
            vec!["Newer by Adams", "Newer by Zobel", "Newer, no authors", "Old"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_autocitation_filter() {
        let fixture = fixture(&["alpha"]);
        let seed = PublicationBuilder::new("Seed")
            .author(author("Adams", &["A."]))
            .author(author("Brown", &["B."]))
            .year(2015)
            .build();

        fixture.mocks[0].set_citation_results(vec![
            // Shares Brown with the seed set: autocitation, dropped.
            PublicationBuilder::new("By B and C")
                .author(author("Brown", &["B."]))
                .author(author("Clark", &["C."]))
                .year(2018)
                .build(),
            // Disjoint author set: retained.
            PublicationBuilder::new("By C and D")
                .author(author("Clark", &["C."]))
                .author(author("Davis", &["D."]))
                .year(2017)
                .build(),
        ]);

        let result = fixture.pipeline.search_citations(&[seed]).await.unwrap();
        assert_eq!(result.publications.len(), 1);
        assert_eq!(result.publications[0].title, "By C and D");
    }

    #[tokio::test(start_paused = true)]
    async fn test_citations_sorted_year_ascending() {
        let fixture = fixture(&["alpha"]);
        let seed = PublicationBuilder::new("Seed")
            .author(author("Smith", &["J."]))
            .year(2000)
            .build();

        fixture.mocks[0].set_citation_results(vec![
            PublicationBuilder::new("Late")
                .author(author("Young", &[]))
                .year(2020)
                .build(),
            PublicationBuilder::new("Early")
                .author(author("Old", &[]))
                .year(2005)
                .build(),
        ]);

        let result = fixture.pipeline.search_citations(&[seed]).await.unwrap();
        let titles: Vec<&str> = result
            .publications
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Early", "Late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_surname_rejected_before_fan_out() {
        let fixture = fixture(&["alpha"]);
        let err = fixture
            .pipeline
            .search_by_author("   ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
        assert_eq!(fixture.mocks[0].search_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_year_rejected() {
        let fixture = fixture(&["alpha"]);
        let err = fixture
            .pipeline
            .search_by_author("Smith", None, Some(-5))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_seed_list_rejected() {
        let fixture = fixture(&["alpha"]);
        let err = fixture.pipeline.search_citations(&[]).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assign_indexes_contains_failures() {
        let fixture = fixture(&["alpha", "beta"]);
        fixture.mocks[0]
            .set_indexes_to_assign(vec![crate::models::TaggedValue::new("SCI")]);
        fixture.mocks[1].fail_next("index service down");

        let mut publications = vec![PublicationBuilder::new("A")
            .author(author("Smith", &["J."]))
            .year(2020)
            .build()];
        let failures = fixture
            .pipeline
            .assign_indexes(&mut publications)
            .await
            .unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, "beta");
        assert_eq!(publications[0].indexes.len(), 1);
        // The failing source also leaves an annotation on the records.
        assert!(publications[0].errors[0].contains("beta"));
    }
}
