//! Basename tokenization

use regex::Regex;
use std::collections::BTreeSet;

/// Splits basenames into lower-cased words on configurable separators
#[derive(Debug, Clone)]
pub struct Tokenizer {
    separator: Regex,
}

impl Tokenizer {
    /// Build a tokenizer; any match of any pattern separates two words
    pub fn new<S: AsRef<str>>(separators: &[S]) -> Result<Self, regex::Error> {
        let alternation = separators
            .iter()
            .map(|pattern| format!("(?:{})", pattern.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        // An empty list separates nothing
        let pattern = if alternation.is_empty() { "$^".to_string() } else { alternation };
        Ok(Self {
            separator: Regex::new(&pattern)?,
        })
    }

    /// Distinct non-empty words of `basename`
    pub fn tokenize(&self, basename: &str) -> BTreeSet<String> {
        let lowered = basename.to_lowercase();
        self.separator
            .split(&lowered)
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .collect()
    }
}
