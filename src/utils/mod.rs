//! Utility modules supporting the aggregation core.
//!
//! - [`throttle`]: sliding-window rate limiter with scoped guards
//! - [`cache`]: single-flight cache-aside over the shared store
//! - [`merge`]: fuzzy cross-source deduplication and merge
//! - [`hash`]: content-hash keys shared by the cache and the request log

pub mod cache;
pub mod hash;
pub mod merge;
pub mod throttle;

pub use cache::{CacheError, SingleFlightCache};
pub use hash::content_hash;
pub use merge::{authors_equivalent, merge_publications, publications_equivalent};
pub use throttle::{RateLimiter, ThrottleConfig, ThrottleGuard, ThrottleTimeout};
