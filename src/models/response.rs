//! Aggregated query results and per-source failure annotations.

use serde::{Deserialize, Serialize};

use crate::models::Publication;

/// A contained failure of one source during a fan-out.
///
/// One source failing never aborts the whole query; its failure is recorded
/// here and the remaining sources still contribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    /// Identifier of the source that failed
    pub source: String,

    /// Human-readable failure description
    pub error: String,
}

impl SourceFailure {
    pub fn new(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            error: error.into(),
        }
    }
}

/// Result of one aggregation pipeline call: merged publications plus the
/// failures of any sources that could not contribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Deduplicated, ordered publications
    pub publications: Vec<Publication>,

    /// Sources that failed and contributed nothing
    pub failures: Vec<SourceFailure>,
}

impl AggregateResult {
    pub fn new(publications: Vec<Publication>, failures: Vec<SourceFailure>) -> Self {
        Self {
            publications,
            failures,
        }
    }

    /// True when every configured source contributed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
