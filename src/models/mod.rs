//! Core data models for bibliographic records and aggregation results.

mod publication;
mod response;

pub use publication::{Author, Publication, PublicationBuilder, TaggedValue};
pub use response::{AggregateResult, SourceFailure};
