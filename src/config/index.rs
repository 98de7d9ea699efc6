//! Index and query configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Separator patterns splitting a basename into words
pub const DEFAULT_SEPARATORS: &[&str] = &[
    r"\s+",
    r"[._\-+,;:!?]",
    r#"['"`]"#,
    r"[()\[\]{}<>]",
    r"[&@#~=/\\|*%$^]",
];

/// Inverted index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Regex fragments; any match separates two words
    pub separators: Vec<String>,
    /// Entries indexed per posting transaction
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            batch_size: 1000,
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Results per page
    pub page_size: usize,
    /// Lifetime of a cached candidate set (seconds)
    pub cache_ttl_secs: u64,
    /// Sort order used when a request names none
    pub default_sort: String,
}

impl QueryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            cache_ttl_secs: 3600,
            default_sort: "server".to_string(),
        }
    }
}
