//! Publication model representing a bibliographic record from any source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One author of a publication.
///
/// `names` holds the ordered given-name tokens exactly as the source
/// delivered them: full names ("John") or initials ("J."). Sources with
/// unparseable author strings keep the original text in `raw`.
///
/// Authors are compared with the fuzzy relation in [`crate::utils::merge`],
/// not with `==`; the derived equality is byte-exact and only suitable for
/// tests and provenance bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Family name
    pub surname: String,

    /// Ordered given-name tokens (full names or initials)
    #[serde(default)]
    pub names: Vec<String>,

    /// Unparsed source text, when the provider gave us a single string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Author {
    pub fn new(surname: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            surname: surname.into(),
            names,
            raw: None,
        }
    }

    /// Author with a surname only, given names unknown.
    pub fn surname_only(surname: impl Into<String>) -> Self {
        Self::new(surname, Vec::new())
    }

    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.names {
            write!(f, "{} ", name)?;
        }
        write!(f, "{}", self.surname)
    }
}

/// A typed value attached to a publication: an identifier (ISBN, ISSN, DOI,
/// WOK id, ...), a source URL, a citation URL, or an index membership.
///
/// Equality is exact on `(kind, value)`; the description is a free-form
/// annotation (for example which edition an ISBN belongs to) and does not
/// participate in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedValue {
    /// The value itself (the identifier text, the URL, the index name)
    pub value: String,

    /// Type tag ("ISBN", "ISSN", "WOK", "SCOPUS", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Free-form annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaggedValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: None,
            description: None,
        }
    }

    pub fn with_kind(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: Some(kind.into()),
            description: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Identity key used when set-unioning tagged values across records.
    pub fn identity(&self) -> (Option<&str>, &str) {
        (self.kind.as_deref(), &self.value)
    }
}

impl PartialEq for TaggedValue {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TaggedValue {}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "{}:", kind)?;
        }
        write!(f, "{}", self.value)?;
        if let Some(description) = &self.description {
            write!(f, "({})", description)?;
        }
        Ok(())
    }
}

/// A bibliographic record from any federated source.
///
/// The serde representation is the wire format: structured, field-named,
/// with nested [`Author`] and [`TaggedValue`] sub-records. Encoding and
/// decoding must round-trip losslessly; the cache relies on it.
///
/// A merged record is immutable except for `errors` and `indexes`, which
/// downstream collaborators may still annotate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Title of the work
    pub title: String,

    /// Ordered author list
    #[serde(default)]
    pub authors: Vec<Author>,

    /// Publication year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Journal / conference / book the work appeared in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_in: Option<String>,

    /// Book series `published_in` belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,

    /// Volume within `published_in`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    /// Issue within the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,

    /// Page range within `published_in`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,

    /// Special issue designation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_issue: Option<String>,

    /// Supplement designation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplement: Option<String>,

    /// Article number, for venues that number instead of paginate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_no: Option<String>,

    /// Publisher name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Identifiers of this work (ISBN, ISSN, DOI, provider ids, ...)
    #[serde(default)]
    pub identifiers: Vec<TaggedValue>,

    /// URLs of the source database records this publication came from
    #[serde(default)]
    pub source_urls: Vec<TaggedValue>,

    /// URLs listing works citing this publication
    #[serde(default)]
    pub cite_urls: Vec<TaggedValue>,

    /// Citation indexes the work is listed in
    #[serde(default)]
    pub indexes: Vec<TaggedValue>,

    /// Times-cited count reported by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_cited: Option<u32>,

    /// Set when the source truncated the author list
    #[serde(default)]
    pub authors_incomplete: bool,

    /// Error annotations accumulated while assembling this record
    #[serde(default)]
    pub errors: Vec<String>,

    /// The source records this canonical record was merged from
    #[serde(default)]
    pub merge_sources: Vec<Publication>,
}

impl Publication {
    /// Create a publication with the required fields.
    pub fn new(title: impl Into<String>, authors: Vec<Author>, year: Option<i32>) -> Self {
        Self {
            title: title.into(),
            authors,
            year,
            published_in: None,
            series: None,
            volume: None,
            issue: None,
            pages: None,
            special_issue: None,
            supplement: None,
            article_no: None,
            publisher: None,
            identifiers: Vec::new(),
            source_urls: Vec::new(),
            cite_urls: Vec::new(),
            indexes: Vec::new(),
            times_cited: None,
            authors_incomplete: false,
            errors: Vec::new(),
            merge_sources: Vec::new(),
        }
    }

    /// Surname of the first author, if any.
    pub fn first_author_surname(&self) -> Option<&str> {
        self.authors.first().map(|a| a.surname.as_str())
    }

    /// Append an error annotation.
    pub fn annotate_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        if let Some(year) = self.year {
            writeln!(f, "  Publication year: {}", year)?;
        }
        let authors: Vec<String> = self.authors.iter().map(|a| a.to_string()).collect();
        writeln!(f, "  Authors: {}", authors.join(", "))?;
        if let Some(published_in) = &self.published_in {
            writeln!(f, "  Published in: {}", published_in)?;
        }
        if let Some(pages) = &self.pages {
            writeln!(f, "  Pages: {}", pages)?;
        }
        if let Some(issue) = &self.issue {
            writeln!(f, "  Issue: {}", issue)?;
        }
        if let Some(special_issue) = &self.special_issue {
            writeln!(f, "  Special issue: {}", special_issue)?;
        }
        if let Some(supplement) = &self.supplement {
            writeln!(f, "  Supplement: {}", supplement)?;
        }
        if let Some(volume) = &self.volume {
            writeln!(f, "  Volume: {}", volume)?;
        }
        if let Some(series) = &self.series {
            writeln!(f, "  Series: {}", series)?;
        }
        let urls: Vec<String> = self.source_urls.iter().map(|u| u.to_string()).collect();
        writeln!(f, "  Source URLs: {}", urls.join(" "))?;
        let ids: Vec<String> = self.identifiers.iter().map(|i| i.to_string()).collect();
        writeln!(f, "  Identifiers: {}", ids.join(" "))
    }
}

/// Builder for constructing [`Publication`] values field by field.
#[derive(Debug, Clone)]
pub struct PublicationBuilder {
    publication: Publication,
}

impl PublicationBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            publication: Publication::new(title, Vec::new(), None),
        }
    }

    pub fn author(mut self, author: Author) -> Self {
        self.publication.authors.push(author);
        self
    }

    pub fn authors(mut self, authors: Vec<Author>) -> Self {
        self.publication.authors = authors;
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.publication.year = Some(year);
        self
    }

    pub fn published_in(mut self, published_in: impl Into<String>) -> Self {
        self.publication.published_in = Some(published_in.into());
        self
    }

    pub fn series(mut self, series: impl Into<String>) -> Self {
        self.publication.series = Some(series.into());
        self
    }

    pub fn volume(mut self, volume: impl Into<String>) -> Self {
        self.publication.volume = Some(volume.into());
        self
    }

    pub fn issue(mut self, issue: impl Into<String>) -> Self {
        self.publication.issue = Some(issue.into());
        self
    }

    pub fn pages(mut self, pages: impl Into<String>) -> Self {
        self.publication.pages = Some(pages.into());
        self
    }

    pub fn special_issue(mut self, special_issue: impl Into<String>) -> Self {
        self.publication.special_issue = Some(special_issue.into());
        self
    }

    pub fn supplement(mut self, supplement: impl Into<String>) -> Self {
        self.publication.supplement = Some(supplement.into());
        self
    }

    pub fn article_no(mut self, article_no: impl Into<String>) -> Self {
        self.publication.article_no = Some(article_no.into());
        self
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publication.publisher = Some(publisher.into());
        self
    }

    pub fn identifier(mut self, identifier: TaggedValue) -> Self {
        self.publication.identifiers.push(identifier);
        self
    }

    pub fn source_url(mut self, url: TaggedValue) -> Self {
        self.publication.source_urls.push(url);
        self
    }

    pub fn cite_url(mut self, url: TaggedValue) -> Self {
        self.publication.cite_urls.push(url);
        self
    }

    pub fn index(mut self, index: TaggedValue) -> Self {
        self.publication.indexes.push(index);
        self
    }

    pub fn times_cited(mut self, times_cited: u32) -> Self {
        self.publication.times_cited = Some(times_cited);
        self
    }

    pub fn authors_incomplete(mut self, incomplete: bool) -> Self {
        self.publication.authors_incomplete = incomplete;
        self
    }

    pub fn build(self) -> Publication {
        self.publication
    }
}
