//! Shell-style query splitting

use std::collections::BTreeSet;
use thiserror::Error;

/// Query text that cannot be split into terms
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unbalanced {0} quote in query")]
    UnbalancedQuote(char),
    #[error("dangling escape at end of query")]
    DanglingEscape,
}

/// Split `query` into lower-cased, distinct terms in sorted order
///
/// Whitespace separates terms; single or double quotes keep a phrase whole;
/// a backslash escapes the next character outside single quotes.
pub fn parse_terms(query: &str) -> Result<Vec<String>, QueryError> {
    let mut terms = BTreeSet::new();
    let mut current = String::new();
    let mut in_term = false;
    let mut chars = query.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                in_term = true;
                let quote = c;
                loop {
                    match chars.next() {
                        Some(next) if next == quote => break,
                        Some('\\') if quote == '"' => {
                            current.push(chars.next().ok_or(QueryError::UnbalancedQuote(quote))?)
                        }
                        Some(next) => current.push(next),
                        None => return Err(QueryError::UnbalancedQuote(quote)),
                    }
                }
            }
            '\\' => {
                in_term = true;
                current.push(chars.next().ok_or(QueryError::DanglingEscape)?);
            }
            c if c.is_whitespace() => {
                if in_term {
                    terms.insert(std::mem::take(&mut current).to_lowercase());
                    in_term = false;
                }
            }
            c => {
                in_term = true;
                current.push(c);
            }
        }
    }
    if in_term {
        terms.insert(current.to_lowercase());
    }

    terms.remove("");
    Ok(terms.into_iter().collect())
}
