//! Inverted index maintenance

use std::sync::Arc;

use tracing::{debug, info};

use super::Tokenizer;
use crate::config::IndexConfig;
use crate::generation::{current_of, entries_of};
use crate::store::{keys, Keyspace, StoreError, WriteBatch};
use crate::types::GenerationId;

/// Outcome of a posting sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Posting sets inspected
    pub postings: usize,
    /// Dangling entry refs removed
    pub removed: usize,
    /// Posting sets deleted because they became empty
    pub emptied: usize,
}

/// Builds word postings from generation entries
///
/// Postings hold generation-tagged entry refs, so refs of a pending
/// generation stay invisible until its promotion.
#[derive(Clone)]
pub struct IndexBuilder {
    keyspace: Arc<dyn Keyspace>,
    tokenizer: Arc<Tokenizer>,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(keyspace: Arc<dyn Keyspace>, config: &IndexConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            keyspace,
            tokenizer: Arc::new(Tokenizer::new(&config.separators)?),
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Insert postings for every entry of one generation; returns entries indexed
    pub fn index_generation(&self, server: &str, generation: GenerationId) -> Result<usize, StoreError> {
        let entries = {
            let view = self.keyspace.view()?;
            entries_of(view.as_ref(), server, generation)
        };

        for chunk in entries.chunks(self.batch_size) {
            let mut batch = WriteBatch::new();
            for entry in chunk {
                let entry_ref = entry.entry_ref().to_string();
                for token in self.tokenizer.tokenize(&entry.name) {
                    batch.add(keys::posting(&token), [entry_ref.clone()]);
                }
            }
            self.keyspace.apply(batch)?;
        }

        debug!("Indexed {} entries of {} generation {}", entries.len(), server, generation);
        Ok(entries.len())
    }

    /// Rebuild postings of the current generation of `server`
    ///
    /// Idempotent. Returns 0 for a server that never completed a crawl.
    pub fn update(&self, server: &str) -> Result<usize, StoreError> {
        let current = {
            let view = self.keyspace.view()?;
            current_of(view.as_ref(), server)
        };
        match current {
            Some(generation) => self.index_generation(server, generation),
            None => Ok(0),
        }
    }

    /// Remove refs to entries that no longer exist from every posting set
    pub fn purge_stale(&self) -> Result<PurgeReport, StoreError> {
        let posting_keys = {
            let view = self.keyspace.view()?;
            view.keys_with_prefix(keys::POSTING_PREFIX)
        };

        let mut report = PurgeReport {
            postings: posting_keys.len(),
            ..PurgeReport::default()
        };

        for key in posting_keys {
            let mut removed = 0;
            let mut emptied = false;
            self.keyspace.transact(&mut |view| {
                let members = view.members(&key);
                let dangling: Vec<String> = members
                    .iter()
                    .filter(|entry_ref| !view.exists(&format!("{}{}", keys::ENTRY_PREFIX, entry_ref)))
                    .cloned()
                    .collect();
                removed = dangling.len();
                emptied = !dangling.is_empty() && dangling.len() == members.len();

                let mut batch = WriteBatch::new();
                if !dangling.is_empty() {
                    batch.remove(key.clone(), dangling);
                }
                Ok(batch)
            })?;
            report.removed += removed;
            report.emptied += usize::from(emptied);
        }

        info!(
            "Swept {} posting sets: {} stale refs removed, {} sets emptied",
            report.postings, report.removed, report.emptied
        );
        Ok(report)
    }
}
