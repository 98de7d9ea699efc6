//! Cached candidate sets
//!
//! Cached sets live under `results:{epoch}:{digest}` with a TTL. Bumping the
//! epoch makes every older set unreachable at once; the purge and promote
//! transactions bump it alongside their own writes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::store::{keys, Keyspace, ReadView, StoreError, WriteBatch};

/// Current cache epoch
pub fn current_epoch(view: &dyn ReadView) -> u64 {
    view.get(keys::RESULTS_EPOCH)
        .and_then(|epoch| epoch.parse().ok())
        .unwrap_or(0)
}

/// Add an epoch increment to `batch`
pub fn bump_epoch(view: &dyn ReadView, batch: &mut WriteBatch) {
    batch.set(keys::RESULTS_EPOCH, current_epoch(view) + 1);
}

/// Content digest of a normalized term list
pub fn digest(terms: &[String]) -> String {
    let mut hasher = Sha256::new();
    for term in terms {
        hasher.update(term.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Expiring store of query candidate sets
#[derive(Clone)]
pub struct ResultCache {
    keyspace: Arc<dyn Keyspace>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(keyspace: Arc<dyn Keyspace>, ttl: Duration) -> Self {
        Self { keyspace, ttl }
    }

    /// Cached set for `digest` as seen by `view`, if any
    pub fn lookup(&self, view: &dyn ReadView, digest: &str) -> Option<BTreeSet<String>> {
        let key = keys::results(current_epoch(view), digest);
        view.exists(&key).then(|| view.members(&key))
    }

    /// Cache `members` under the epoch they were computed in
    ///
    /// Empty sets are not stored.
    pub fn store(&self, epoch: u64, digest: &str, members: &BTreeSet<String>) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }
        let key = keys::results(epoch, digest);
        let mut batch = WriteBatch::new();
        batch
            .delete(key.clone())
            .add(key.clone(), members.iter().cloned())
            .expire(key, self.ttl);
        self.keyspace.apply(batch)
    }

    /// Drop every cached set
    pub fn invalidate(&self) -> Result<(), StoreError> {
        let mut dropped = 0;
        self.keyspace.transact(&mut |view| {
            let mut batch = WriteBatch::new();
            let stale = view.keys_with_prefix(keys::RESULTS_PREFIX);
            dropped = stale.len();
            for key in stale {
                batch.delete(key);
            }
            bump_epoch(view, &mut batch);
            Ok(batch)
        })?;
        debug!("Invalidated result cache ({} sets dropped)", dropped);
        Ok(())
    }
}
