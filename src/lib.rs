//! ftpdex: crawler and keyword index for a fleet of FTP servers
//!
//! - Per-server crawl sessions walking directory trees over FTP
//! - Generation-versioned snapshots with atomic promotion
//! - Inverted word index over file basenames
//! - Paginated, sortable keyword search with a result-set cache
//! - Fleet-wide crawl batches on a bounded worker pool

pub mod catalog;
pub mod config;
pub mod crawl;
pub mod generation;
pub mod index;
pub mod logging;
pub mod orchestrator;
pub mod query;
pub mod store;
pub mod types;

pub use config::Config;
pub use types::*;
