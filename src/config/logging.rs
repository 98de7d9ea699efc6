//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level, most verbose first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Level lowered by `steps` towards `Trace` (one step per `-v` flag)
    pub fn more_verbose(self, steps: u8) -> Self {
        const ORDER: [LogLevel; 5] = [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ];
        let idx = ORDER.iter().position(|l| *l == self).unwrap_or(2);
        ORDER[idx.saturating_sub(steps as usize)]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Include the module target in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
            with_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_verbose_saturates_at_trace() {
        assert_eq!(LogLevel::Info.more_verbose(0), LogLevel::Info);
        assert_eq!(LogLevel::Info.more_verbose(1), LogLevel::Debug);
        assert_eq!(LogLevel::Warn.more_verbose(5), LogLevel::Trace);
    }

    #[test]
    fn test_level_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let parsed: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Warn);
    }
}
