//! Tracing subscriber setup

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive for the configured level raised by `verbose` steps
pub fn filter_directive(config: &LoggingConfig, verbose: u8) -> String {
    config.level.more_verbose(verbose).to_string()
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config, verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_filter_directive_follows_verbosity() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directive(&config, 0), "info");
        assert_eq!(filter_directive(&config, 2), "trace");

        let quiet = LoggingConfig {
            level: LogLevel::Error,
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&quiet, 1), "warn");
    }
}
