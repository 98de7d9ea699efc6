//! Keyword search
//!
//! Queries are split into terms, resolved to candidate sets by intersecting
//! postings, filtered to current generations (and optionally to online
//! servers), then sorted and paginated by the keyspace.

pub mod cache;
mod engine;
mod sort;
mod terms;

pub use cache::ResultCache;
pub use engine::QueryEngine;
pub use sort::{SortField, SortOrder};
pub use terms::{parse_terms, QueryError};
