//! Inverted word index over entry basenames
//!
//! `posting:{token}` sets map each word to the refs of entries whose
//! basename contains it. Postings are derived data: entry records stay the
//! source of truth and dangling refs are swept by
//! [`IndexBuilder::purge_stale`].

mod builder;
mod tokenizer;

pub use builder::{IndexBuilder, PurgeReport};
pub use tokenizer::Tokenizer;
