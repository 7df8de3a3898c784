//! Fuzzy cross-source deduplication and merge.
//!
//! Multiple sources report the same work with noisy differences: initials
//! instead of full given names, missing page ranges, differently cased
//! venues, diacritics stripped or kept. This module groups equivalent
//! records into buckets and collapses each bucket into one canonical
//! [`Publication`] that keeps the best value of every field and the full
//! provenance.
//!
//! Pure and stateless; quadratic per bucket, which is fine for per-query
//! result sets (tens to low hundreds of records).

use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::{Author, Publication, TaggedValue};

/// Unicode-fold a string: NFKD decomposition with combining marks dropped,
/// lowercased. "Novák" and "Novak" fold to the same text.
fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalized surname: folded, non-letters stripped.
pub fn normalize_surname(surname: &str) -> String {
    fold(surname).chars().filter(|c| c.is_alphabetic()).collect()
}

/// Normalized field text: folded, only alphanumerics kept. Page ranges,
/// volumes and issues keep their digits this way.
fn normalize_field(text: &str) -> String {
    fold(text).chars().filter(|c| c.is_alphanumeric()).collect()
}

/// A given-name token is an initial when it is a single letter, optionally
/// followed by a dot ("J", "J.").
fn is_initial(token: &str) -> bool {
    let trimmed = token.trim_end_matches('.');
    trimmed.chars().count() == 1 && trimmed.chars().all(char::is_alphabetic)
}

fn tokens_compatible(a: &str, b: &str) -> bool {
    if is_initial(a) || is_initial(b) {
        let a_lead = fold(a).chars().next();
        let b_lead = fold(b).chars().next();
        a_lead.is_some() && a_lead == b_lead
    } else {
        fold(a) == fold(b)
    }
}

/// Fuzzy author equivalence.
///
/// Surnames must fold-match. Given-name tokens are compared pairwise up to
/// the shorter list: two full names must match exactly after folding, while
/// an initial only has to agree on the leading letter. An author with no
/// given names at all is compatible with anyone sharing the surname.
pub fn authors_equivalent(a: &Author, b: &Author) -> bool {
    if normalize_surname(&a.surname) != normalize_surname(&b.surname) {
        return false;
    }
    if a.names.is_empty() || b.names.is_empty() {
        return true;
    }
    a.names
        .iter()
        .zip(b.names.iter())
        .all(|(x, y)| tokens_compatible(x, y))
}

/// Two author lists are equal as sets under [`authors_equivalent`].
fn author_sets_equivalent(a: &[Author], b: &[Author]) -> bool {
    a.iter().all(|x| b.iter().any(|y| authors_equivalent(x, y)))
        && b.iter().all(|y| a.iter().any(|x| authors_equivalent(x, y)))
}

/// A field matches when either side is missing/empty or the normalized
/// values agree. A record that omits its page range can still merge with
/// one that has it.
fn fields_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (non_empty(a), non_empty(b)) {
        (Some(a), Some(b)) => normalize_field(a) == normalize_field(b),
        _ => true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fuzzy publication equivalence.
pub fn publications_equivalent(a: &Publication, b: &Publication) -> bool {
    if a.year != b.year {
        return false;
    }
    if !fields_compatible(Some(&a.title), Some(&b.title)) {
        return false;
    }
    if !fields_compatible(a.pages.as_deref(), b.pages.as_deref())
        || !fields_compatible(a.volume.as_deref(), b.volume.as_deref())
        || !fields_compatible(a.issue.as_deref(), b.issue.as_deref())
        || !fields_compatible(a.published_in.as_deref(), b.published_in.as_deref())
    {
        return false;
    }
    if a.authors_incomplete || b.authors_incomplete {
        return true;
    }
    author_sets_equivalent(&a.authors, &b.authors)
}

/// Group equivalent records and merge each group into one canonical record.
///
/// Candidates are sorted by (year, title) for locality, then buckets are
/// grown by sweeping the remainder and pulling in anything equivalent to
/// any current bucket member, until a sweep moves nothing. Growing from the
/// whole bucket rather than the seed alone makes equivalence effectively
/// transitive through chains (A≈B, B≈C pulls in C even when A and C differ
/// too much to match directly); this mirrors the long-observed behavior of
/// the merge and is kept deliberately.
pub fn merge_publications(publications: Vec<Publication>) -> Vec<Publication> {
    let mut remaining = publications;
    remaining.sort_by(|a, b| {
        (a.year, normalize_field(&a.title)).cmp(&(b.year, normalize_field(&b.title)))
    });

    let mut merged = Vec::new();
    while !remaining.is_empty() {
        let seed = remaining.remove(0);
        let mut bucket = vec![seed];
        loop {
            let mut moved = false;
            let mut index = 0;
            while index < remaining.len() {
                if bucket
                    .iter()
                    .any(|member| publications_equivalent(member, &remaining[index]))
                {
                    bucket.push(remaining.remove(index));
                    moved = true;
                } else {
                    index += 1;
                }
            }
            if !moved {
                break;
            }
        }
        merged.push(merge_bucket(bucket));
    }
    merged
}

/// Collapse one bucket of equivalent records into a canonical record.
fn merge_bucket(bucket: Vec<Publication>) -> Publication {
    let longest_scalar = |extract: fn(&Publication) -> Option<&str>| -> Option<String> {
        let mut best: Option<&str> = None;
        for member in &bucket {
            if let Some(value) = non_empty(extract(member)) {
                // Strictly longer wins; ties keep the first encountered.
                if best.is_none_or(|current| value.len() > current.len()) {
                    best = Some(value);
                }
            }
        }
        best.map(str::to_string)
    };

    let title = longest_scalar(|p| Some(p.title.as_str())).unwrap_or_default();

    // The author list and the incompleteness flag travel together; a longer
    // list from a record flagged incomplete must keep its flag.
    let best_author_member = bucket
        .iter()
        .enumerate()
        .max_by(|(ai, a), (bi, b)| {
            a.authors
                .len()
                .cmp(&b.authors.len())
                .then(bi.cmp(ai)) // first encountered wins ties
        })
        .map(|(_, member)| member)
        .expect("bucket is never empty");
    let authors = best_author_member.authors.clone();
    let authors_incomplete = best_author_member.authors_incomplete;

    let mut canonical = Publication::new(title, authors, bucket[0].year);
    canonical.authors_incomplete = authors_incomplete;
    canonical.published_in = longest_scalar(|p| p.published_in.as_deref());
    canonical.series = longest_scalar(|p| p.series.as_deref());
    canonical.volume = longest_scalar(|p| p.volume.as_deref());
    canonical.issue = longest_scalar(|p| p.issue.as_deref());
    canonical.pages = longest_scalar(|p| p.pages.as_deref());
    canonical.special_issue = longest_scalar(|p| p.special_issue.as_deref());
    canonical.supplement = longest_scalar(|p| p.supplement.as_deref());
    canonical.article_no = longest_scalar(|p| p.article_no.as_deref());
    canonical.publisher = longest_scalar(|p| p.publisher.as_deref());

    canonical.identifiers = union_tagged(&bucket, |p| &p.identifiers);
    canonical.source_urls = union_tagged(&bucket, |p| &p.source_urls);
    canonical.cite_urls = union_tagged(&bucket, |p| &p.cite_urls);
    canonical.indexes = union_tagged(&bucket, |p| &p.indexes);

    canonical.times_cited = bucket.iter().filter_map(|p| p.times_cited).max();
    canonical.errors = bucket.iter().flat_map(|p| p.errors.clone()).collect();

    // One level of provenance: the members themselves, minus their own
    // provenance, so repeated merges do not nest indefinitely.
    canonical.merge_sources = bucket
        .into_iter()
        .map(|mut member| {
            member.merge_sources = Vec::new();
            member
        })
        .collect();

    canonical
}

/// Union tagged values across the bucket on (kind, value), keeping the
/// first-encountered order and description.
fn union_tagged(
    bucket: &[Publication],
    extract: fn(&Publication) -> &Vec<TaggedValue>,
) -> Vec<TaggedValue> {
    let mut seen: HashSet<(Option<String>, String)> = HashSet::new();
    let mut union = Vec::new();
    for member in bucket {
        for value in extract(member) {
            let identity = (value.kind.clone(), value.value.clone());
            if seen.insert(identity) {
                union.push(value.clone());
            }
        }
    }
    union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublicationBuilder;

    fn author(surname: &str, names: &[&str]) -> Author {
        Author::new(surname, names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_initial_matches_full_name() {
        assert!(authors_equivalent(
            &author("Smith", &["J."]),
            &author("Smith", &["John"]),
        ));
    }

    #[test]
    fn test_different_full_names_do_not_match() {
        assert!(!authors_equivalent(
            &author("Smith", &["John"]),
            &author("Smith", &["Jane"]),
        ));
    }

    #[test]
    fn test_missing_given_names_are_compatible() {
        assert!(authors_equivalent(
            &author("Smith", &[]),
            &author("Smith", &["John"]),
        ));
    }

    #[test]
    fn test_folded_surnames_match() {
        assert!(authors_equivalent(
            &author("Novák", &["Peter"]),
            &author("Novak", &["Peter"]),
        ));
        assert!(!authors_equivalent(
            &author("Novák", &["Peter"]),
            &author("Horák", &["Peter"]),
        ));
    }

    #[test]
    fn test_year_mismatch_blocks_equivalence() {
        let a = PublicationBuilder::new("Graph Coloring").year(2010).build();
        let b = PublicationBuilder::new("Graph Coloring").year(2011).build();
        assert!(!publications_equivalent(&a, &b));
    }

    #[test]
    fn test_missing_fields_are_wildcards() {
        let a = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .pages("1-5")
            .build();
        let b = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["John"]))
            .year(2010)
            .published_in("J. Algo")
            .build();
        assert!(publications_equivalent(&a, &b));
    }

    #[test]
    fn test_incomplete_authors_skip_author_check() {
        let a = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .authors_incomplete(true)
            .build();
        let b = PublicationBuilder::new("Graph Coloring")
            .author(author("Jones", &["K."]))
            .year(2010)
            .build();
        assert!(publications_equivalent(&a, &b));
    }

    #[test]
    fn test_no_duplicates_pass_through() {
        let a = PublicationBuilder::new("Paper A")
            .author(author("Smith", &["J."]))
            .year(2010)
            .build();
        let b = PublicationBuilder::new("Paper B")
            .author(author("Smith", &["J."]))
            .year(2011)
            .build();

        let merged = merge_publications(vec![a.clone(), b.clone()]);
        assert_eq!(merged.len(), 2);
        for record in &merged {
            assert_eq!(record.merge_sources.len(), 1);
        }
        // Apart from provenance the records are unchanged.
        assert_eq!(merged[0].title, "Paper A");
        assert_eq!(merged[1].title, "Paper B");
    }

    #[test]
    fn test_merge_takes_best_fields() {
        let a = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .author(author("Jones", &["K."]))
            .year(2010)
            .pages("1-5")
            .build();
        let b = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["John"]))
            .author(author("Jones", &["Karen"]))
            .year(2010)
            .published_in("J. Algo")
            .build();

        let merged = merge_publications(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let canonical = &merged[0];
        assert_eq!(canonical.pages.as_deref(), Some("1-5"));
        assert_eq!(canonical.published_in.as_deref(), Some("J. Algo"));
        assert_eq!(canonical.merge_sources.len(), 2);
        // Equal-length author lists: the first-encountered member's list wins.
        assert_eq!(canonical.authors.len(), 2);
        assert_eq!(canonical.authors[0].surname, "Smith");
    }

    #[test]
    fn test_merge_unions_tagged_values_and_maxes_citations() {
        let a = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .identifier(TaggedValue::with_kind("10.1/gc", "DOI"))
            .source_url(TaggedValue::with_kind("https://a.example/1", "SCOPUS"))
            .times_cited(3)
            .build();
        let b = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .identifier(TaggedValue::with_kind("10.1/gc", "DOI"))
            .identifier(TaggedValue::with_kind("000123", "WOK"))
            .source_url(TaggedValue::with_kind("https://b.example/9", "WOK"))
            .times_cited(11)
            .build();

        let merged = merge_publications(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let canonical = &merged[0];
        assert_eq!(canonical.identifiers.len(), 2);
        assert_eq!(canonical.source_urls.len(), 2);
        assert_eq!(canonical.times_cited, Some(11));
    }

    #[test]
    fn test_chain_merging_is_transitive() {
        // A matches B (A has no pages), B matches C (C has no venue), but A
        // and C disagree on nothing either; make A and C differ via fields
        // that only B bridges.
        let a = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .pages("1-5")
            .build();
        let b = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .build();
        let c = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .pages("1-15")
            .build();

        // A and C have incompatible page ranges and would never match
        // directly; B, with no pages, bridges them into one bucket.
        assert!(!publications_equivalent(&a, &c));
        let merged = merge_publications(vec![a, b, c]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].merge_sources.len(), 3);
    }

    #[test]
    fn test_longest_author_list_wins_with_its_flag() {
        let short = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .year(2010)
            .build();
        let long = PublicationBuilder::new("Graph Coloring")
            .author(author("Smith", &["J."]))
            .author(author("Jones", &["K."]))
            .author(author("Lee", &["M."]))
            .year(2010)
            .authors_incomplete(true)
            .build();

        let merged = merge_publications(vec![short, long]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].authors.len(), 3);
        assert!(merged[0].authors_incomplete);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_publications(Vec::new()).is_empty());
    }
}
