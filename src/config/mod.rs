//! Configuration for ftpdex

mod crawl;
mod index;
mod logging;
mod store;

pub use crawl::{CrawlConfig, DEFAULT_IGNORED_NAMES};
pub use index::{IndexConfig, QueryConfig, DEFAULT_SEPARATORS};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use store::{ServerDefaults, StoreConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Crawl configuration
    #[serde(default)]
    pub crawl: CrawlConfig,
    /// Inverted index configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Query engine configuration
    #[serde(default)]
    pub query: QueryConfig,
    /// Keyspace storage configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Defaults for newly sighted servers
    #[serde(default)]
    pub servers: ServerDefaults,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Crawl validation
        if self.crawl.max_connect_retries == 0 {
            errors.push("max_connect_retries must be positive".to_string());
        }
        if self.crawl.max_concurrency == 0 {
            errors.push("max_concurrency must be positive".to_string());
        }
        if self.crawl.max_depth == 0 {
            errors.push("max_depth must be positive".to_string());
        }
        if self.crawl.connect_timeout_secs == 0 {
            errors.push("connect_timeout_secs must be positive".to_string());
        }

        // Index validation
        if self.index.separators.is_empty() {
            errors.push("at least one separator pattern is required".to_string());
        }
        for pattern in &self.index.separators {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("invalid separator pattern '{}': {}", pattern, e));
            }
        }
        if self.index.batch_size == 0 {
            errors.push("index batch_size must be positive".to_string());
        }

        // Query validation
        if self.query.page_size == 0 {
            errors.push("page_size must be positive".to_string());
        }
        if self.query.default_sort.parse::<crate::query::SortOrder>().is_err() {
            errors.push(format!("unknown default_sort '{}'", self.query.default_sort));
        }

        // Server defaults validation
        if self.servers.port == 0 {
            errors.push("default server port must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
