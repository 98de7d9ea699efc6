//! Generational snapshots of each server's file tree
//!
//! A crawl writes into a fresh *pending* generation. Promotion flips the
//! server's `current_generation` pointer and demotes the previous current
//! generation to *stale* in one transaction, so readers always resolve a
//! server to exactly one complete entry set. Purge then drops everything
//! that is not current.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::query::cache;
use crate::store::{keys, Keyspace, ReadView, Record, StoreError, WriteBatch};
use crate::types::{parse_field, Entry, EntryRef, GenerationId, GenerationState};

/// Per-server generation bookkeeping over a shared keyspace
#[derive(Clone)]
pub struct GenerationStore {
    keyspace: Arc<dyn Keyspace>,
}

impl GenerationStore {
    pub fn new(keyspace: Arc<dyn Keyspace>) -> Self {
        Self { keyspace }
    }

    /// Allocate the next pending generation of `server`
    pub fn begin(&self, server: &str) -> Result<GenerationId, StoreError> {
        let mut allocated = GenerationId(0);
        self.keyspace.transact(&mut |view| {
            let last: u64 = view
                .get(&keys::generation_seq(server))
                .and_then(|seq| seq.parse().ok())
                .unwrap_or(0);
            allocated = GenerationId(last + 1);

            let mut record = Record::new();
            record.insert("state".into(), GenerationState::Pending.to_string());
            record.insert("started".into(), Utc::now().timestamp().to_string());

            let mut batch = WriteBatch::new();
            batch
                .set(keys::generation_seq(server), allocated.0)
                .add(keys::generations(server), [allocated.to_string()])
                .set_fields(keys::generation(server, allocated), record);
            Ok(batch)
        })?;

        debug!("Began generation {} for {}", allocated, server);
        Ok(allocated)
    }

    /// Store one entry under a pending generation
    pub fn record(&self, server: &str, generation: GenerationId, entry: &Entry) -> Result<(), StoreError> {
        self.record_batch(server, generation, std::slice::from_ref(entry))
            .map(|_| ())
    }

    /// Store several entries under a pending generation in one transaction
    ///
    /// Entries are re-tagged with `server` and `generation`. Fails when the
    /// generation is not pending, so nothing can be added to a promoted or
    /// purged snapshot.
    pub fn record_batch(
        &self,
        server: &str,
        generation: GenerationId,
        entries: &[Entry],
    ) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        self.keyspace.transact(&mut |view| {
            require_state(view, server, generation, GenerationState::Pending)?;

            let mut batch = WriteBatch::new();
            let mut paths = Vec::with_capacity(entries.len());
            for entry in entries {
                let mut entry = entry.clone();
                entry.server = server.to_string();
                entry.generation = generation;
                batch.set_fields(keys::entry(&entry.entry_ref()), entry.to_record());
                paths.push(entry.path);
            }
            batch.add(keys::generation_entries(server, generation), paths);
            Ok(batch)
        })?;

        Ok(entries.len())
    }

    /// Make `generation` the current one and return the generation it replaced
    pub fn promote(
        &self,
        server: &str,
        generation: GenerationId,
    ) -> Result<Option<GenerationId>, StoreError> {
        let mut previous = None;
        self.keyspace.transact(&mut |view| {
            require_state(view, server, generation, GenerationState::Pending)?;
            previous = view
                .field(&keys::server(server), "current_generation")
                .and_then(|g| g.parse::<GenerationId>().ok());

            let now = Utc::now().timestamp();
            let mut batch = WriteBatch::new();
            if let Some(old) = previous {
                batch.set_field(keys::generation(server, old), "state", GenerationState::Stale);
            }

            let mut promoted = Record::new();
            promoted.insert("state".into(), GenerationState::Current.to_string());
            promoted.insert("promoted".into(), now.to_string());
            batch.set_fields(keys::generation(server, generation), promoted);

            let mut pointer = Record::new();
            pointer.insert("current_generation".into(), generation.to_string());
            pointer.insert("last_crawl".into(), now.to_string());
            batch.set_fields(keys::server(server), pointer);
            // Cached sets were computed against the old pointer
            cache::bump_epoch(view, &mut batch);
            Ok(batch)
        })?;

        info!(
            "Promoted generation {} for {} (previous: {})",
            generation,
            server,
            previous.map(|g| g.to_string()).unwrap_or_else(|| "none".into())
        );
        Ok(previous)
    }

    /// Delete every generation of `server` except the current one
    ///
    /// Pending generations are dropped too, so this must not run while a
    /// crawl of the same server is in flight. Returns the number of entries
    /// removed and invalidates cached result sets when anything was dropped.
    pub fn purge(&self, server: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut dropped = 0;
        self.keyspace.transact(&mut |view| {
            let current = current_of(view, server);
            let (batch, entries, generations) = purge_batch(view, server, current);
            removed = entries;
            dropped = generations;
            Ok(batch)
        })?;

        if dropped > 0 {
            info!("Purged {} generations ({} entries) of {}", dropped, removed, server);
        }
        Ok(removed)
    }

    /// Delete every generation of `server`, current included
    pub fn purge_all(&self, server: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.keyspace.transact(&mut |view| {
            let (batch, entries) = purge_all_batch(view, server);
            removed = entries;
            Ok(batch)
        })?;
        Ok(removed)
    }

    /// The current generation of `server`, if it ever completed a crawl
    pub fn current(&self, server: &str) -> Result<Option<GenerationId>, StoreError> {
        let view = self.keyspace.view()?;
        Ok(current_of(view.as_ref(), server))
    }

    /// Every tracked generation of `server` with its state, oldest first
    pub fn generations(
        &self,
        server: &str,
    ) -> Result<Vec<(GenerationId, GenerationState)>, StoreError> {
        let view = self.keyspace.view()?;
        let mut generations: Vec<(GenerationId, GenerationState)> = tracked(view.as_ref(), server)
            .into_iter()
            .filter_map(|generation| {
                let state = view
                    .field(&keys::generation(server, generation), "state")?
                    .parse()
                    .ok()?;
                Some((generation, state))
            })
            .collect();
        generations.sort_by_key(|(generation, _)| *generation);
        Ok(generations)
    }

    /// Entries of one generation, ordered by path
    pub fn entries(&self, server: &str, generation: GenerationId) -> Result<Vec<Entry>, StoreError> {
        let view = self.keyspace.view()?;
        Ok(entries_of(view.as_ref(), server, generation))
    }
}

// ============================================================================
// View helpers
// ============================================================================

pub(crate) fn current_of(view: &dyn ReadView, server: &str) -> Option<GenerationId> {
    view.record(&keys::server(server))
        .and_then(|record| parse_field(&record, "current_generation"))
}

pub(crate) fn entries_of(view: &dyn ReadView, server: &str, generation: GenerationId) -> Vec<Entry> {
    view.members(&keys::generation_entries(server, generation))
        .into_iter()
        .filter_map(|path| {
            let entry_ref = EntryRef::new(server, generation, path);
            view.record(&keys::entry(&entry_ref))
                .and_then(|record| Entry::from_record(&record))
        })
        .collect()
}

fn tracked(view: &dyn ReadView, server: &str) -> BTreeSet<GenerationId> {
    view.members(&keys::generations(server))
        .iter()
        .filter_map(|g| g.parse().ok())
        .collect()
}

fn require_state(
    view: &dyn ReadView,
    server: &str,
    generation: GenerationId,
    expected: GenerationState,
) -> Result<(), StoreError> {
    let state = view
        .field(&keys::generation(server, generation), "state")
        .and_then(|s| s.parse::<GenerationState>().ok());
    match state {
        Some(state) if state == expected => Ok(()),
        Some(state) => Err(StoreError::Aborted(format!(
            "generation {} of {} is {}, expected {}",
            generation, server, state, expected
        ))),
        None => Err(StoreError::Aborted(format!(
            "unknown generation {} of {}",
            generation, server
        ))),
    }
}

/// Batch deleting every tracked generation except `keep`, with entry and generation counts
/// Writes deleting every generation of `server` and its sequence, with the entry count
pub(crate) fn purge_all_batch(view: &dyn ReadView, server: &str) -> (WriteBatch, usize) {
    let (mut batch, entries, _) = purge_batch(view, server, None);
    batch
        .delete(keys::generations(server))
        .delete(keys::generation_seq(server));
    (batch, entries)
}

fn purge_batch(
    view: &dyn ReadView,
    server: &str,
    keep: Option<GenerationId>,
) -> (WriteBatch, usize, usize) {
    let mut batch = WriteBatch::new();
    let mut entries = 0;
    let mut dropped = Vec::new();

    for generation in tracked(view, server) {
        if Some(generation) == keep {
            continue;
        }
        let paths = view.members(&keys::generation_entries(server, generation));
        entries += paths.len();
        for path in paths {
            batch.delete(keys::entry(&EntryRef::new(server, generation, path)));
        }
        batch
            .delete(keys::generation_entries(server, generation))
            .delete(keys::generation(server, generation));
        dropped.push(generation.to_string());
    }

    let count = dropped.len();
    if count > 0 {
        batch.remove(keys::generations(server), dropped);
        cache::bump_epoch(view, &mut batch);
    }
    (batch, entries, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKeyspace, TxBody};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Keyspace whose writes can be switched off
    struct FailingKeyspace {
        inner: MemoryKeyspace,
        fail: AtomicBool,
    }

    impl Keyspace for FailingKeyspace {
        fn view(&self) -> Result<Box<dyn ReadView + '_>, StoreError> {
            self.inner.view()
        }

        fn transact(&self, body: &mut TxBody<'_>) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Aborted("injected failure".into()));
            }
            self.inner.transact(body)
        }
    }

    fn entry(path: &str, size: u64) -> Entry {
        Entry {
            server: String::new(),
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            is_dir: false,
            size,
            modified: None,
            generation: GenerationId(0),
        }
    }

    fn store() -> GenerationStore {
        GenerationStore::new(Arc::new(MemoryKeyspace::new()))
    }

    #[test]
    fn test_begin_is_monotonic_per_server() {
        let store = store();
        assert_eq!(store.begin("a").unwrap(), GenerationId(1));
        assert_eq!(store.begin("a").unwrap(), GenerationId(2));
        assert_eq!(store.begin("b").unwrap(), GenerationId(1));
        assert_eq!(store.current("a").unwrap(), None);
        assert_eq!(
            store.generations("a").unwrap(),
            vec![
                (GenerationId(1), GenerationState::Pending),
                (GenerationId(2), GenerationState::Pending)
            ]
        );
    }

    #[test]
    fn test_record_tags_entries_with_generation() {
        let store = store();
        let g = store.begin("host").unwrap();
        store.record("host", g, &entry("/pub/a.iso", 10)).unwrap();
        assert_eq!(
            store.record_batch("host", g, &[entry("/pub/b.iso", 20), entry("/pub", 0)]).unwrap(),
            2
        );

        let entries = store.entries("host", g).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.server == "host" && e.generation == g));
    }

    #[test]
    fn test_promote_swaps_current_and_demotes_previous() {
        let store = store();
        let g1 = store.begin("host").unwrap();
        assert_eq!(store.promote("host", g1).unwrap(), None);
        let g2 = store.begin("host").unwrap();
        assert_eq!(store.promote("host", g2).unwrap(), Some(g1));

        assert_eq!(store.current("host").unwrap(), Some(g2));
        assert_eq!(
            store.generations("host").unwrap(),
            vec![(g1, GenerationState::Stale), (g2, GenerationState::Current)]
        );
    }

    #[test]
    fn test_promote_and_record_reject_non_pending() {
        let store = store();
        let g = store.begin("host").unwrap();
        store.promote("host", g).unwrap();

        assert!(matches!(store.promote("host", g), Err(StoreError::Aborted(_))));
        assert!(store.record("host", g, &entry("/x", 1)).is_err());
        assert!(store.promote("host", GenerationId(99)).is_err());
    }

    #[test]
    fn test_purge_keeps_only_current() {
        let store = store();
        let g1 = store.begin("host").unwrap();
        store.record_batch("host", g1, &[entry("/a", 1), entry("/b", 2)]).unwrap();
        store.promote("host", g1).unwrap();

        let g2 = store.begin("host").unwrap();
        store.record("host", g2, &entry("/a", 3)).unwrap();
        store.promote("host", g2).unwrap();

        // Abandoned pending generation
        let g3 = store.begin("host").unwrap();
        store.record("host", g3, &entry("/c", 4)).unwrap();

        assert_eq!(store.purge("host").unwrap(), 3);
        assert_eq!(store.generations("host").unwrap(), vec![(g2, GenerationState::Current)]);
        assert!(store.entries("host", g1).unwrap().is_empty());
        assert_eq!(store.entries("host", g2).unwrap().len(), 1);

        // Second purge is a no-op
        assert_eq!(store.purge("host").unwrap(), 0);
    }

    #[test]
    fn test_promote_and_purge_bump_cache_epoch() {
        let keyspace = Arc::new(MemoryKeyspace::new());
        let store = GenerationStore::new(keyspace.clone());
        let epoch = || cache::current_epoch(keyspace.view().unwrap().as_ref());

        let g1 = store.begin("host").unwrap();
        assert_eq!(epoch(), 0);
        store.promote("host", g1).unwrap();
        assert_eq!(epoch(), 1);
        // Nothing stale yet
        store.purge("host").unwrap();
        assert_eq!(epoch(), 1);

        let g2 = store.begin("host").unwrap();
        store.promote("host", g2).unwrap();
        store.purge("host").unwrap();
        assert_eq!(epoch(), 3);
    }

    #[test]
    fn test_purge_all_forgets_server() {
        let store = store();
        let g = store.begin("host").unwrap();
        store.record("host", g, &entry("/a", 1)).unwrap();
        store.promote("host", g).unwrap();

        assert_eq!(store.purge_all("host").unwrap(), 1);
        assert!(store.generations("host").unwrap().is_empty());
        assert_eq!(store.begin("host").unwrap(), GenerationId(1));
    }

    #[test]
    fn test_store_failures_surface_to_caller() {
        let keyspace = Arc::new(FailingKeyspace {
            inner: MemoryKeyspace::new(),
            fail: AtomicBool::new(false),
        });
        let store = GenerationStore::new(keyspace.clone());
        let g = store.begin("host").unwrap();

        keyspace.fail.store(true, Ordering::SeqCst);
        assert!(store.record("host", g, &entry("/a", 1)).is_err());
        assert!(store.promote("host", g).is_err());
        assert!(store.purge("host").is_err());

        keyspace.fail.store(false, Ordering::SeqCst);
        assert_eq!(store.current("host").unwrap(), None);
        assert!(store.entries("host", g).unwrap().is_empty());
    }
}
