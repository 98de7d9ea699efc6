//! Crawl configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Names skipped during a directory walk unless a server overrides them
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[".", "..", ".svn", ".git", ".hg", "CVS"];

/// Crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Connection attempts before a session fails
    pub max_connect_retries: u32,
    /// Reconnect-and-relist attempts before a directory is abandoned; a failed root fails the crawl
    pub max_list_retries: u32,
    /// Fixed delay before each retry (seconds)
    pub retry_delay_secs: u64,
    /// Deadline for opening connections and for each FTP read or write (seconds)
    pub connect_timeout_secs: u64,
    /// Deepest directory level walked below the root
    pub max_depth: usize,
    /// Basenames never recorded nor recursed into
    pub ignored_names: Vec<String>,
    /// Servers crawled in parallel during a batch
    pub max_concurrency: usize,
}

impl CrawlConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_connect_retries: 3,
            max_list_retries: 1,
            retry_delay_secs: 30,
            connect_timeout_secs: 30,
            max_depth: 64,
            ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
            max_concurrency: 5,
        }
    }
}
