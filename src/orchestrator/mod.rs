//! Crawl batches across the server fleet
//!
//! A batch crawls every online server through a bounded [`WorkerPool`],
//! waits for all sessions to terminate, then sweeps old generations and
//! dangling postings, refreshes server aggregates and drops cached results.

mod pool;

pub use pool::{TaskResult, WorkerPool};

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{Config, CrawlConfig};
use crate::crawl::{CrawlOutcome, CrawlSession, FtpConnector, Sleeper};
use crate::generation::GenerationStore;
use crate::index::{IndexBuilder, PurgeReport};
use crate::query::QueryEngine;
use crate::store::Keyspace;
use crate::types::ServerId;

/// Summary of one crawl batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Servers dispatched to the pool
    pub attempted: usize,
    /// Servers whose new generation was promoted
    pub succeeded: usize,
    /// Servers whose crawl failed, with the reason
    pub failed: Vec<(ServerId, String)>,
    /// Entries recorded across all sessions
    pub entries: usize,
    /// Entries dropped with superseded generations
    pub purged_entries: usize,
    pub postings: PurgeReport,
}

/// Summary of a full index rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub servers: usize,
    /// Entries of current generations written to postings
    pub entries: usize,
    pub postings: PurgeReport,
}

/// Wires the subsystems together for batch work
pub struct Orchestrator {
    catalog: Catalog,
    generations: GenerationStore,
    index: IndexBuilder,
    engine: QueryEngine,
    session: Arc<CrawlSession>,
    config: CrawlConfig,
}

impl Orchestrator {
    pub fn new(
        keyspace: Arc<dyn Keyspace>,
        config: &Config,
        connector: Arc<dyn FtpConnector>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let generations = GenerationStore::new(keyspace.clone());
        let index = IndexBuilder::new(keyspace.clone(), &config.index)
            .context("Invalid index separator pattern")?;
        let session = CrawlSession::new(
            generations.clone(),
            index.clone(),
            connector,
            sleeper,
            config.crawl.clone(),
        )
        .with_batch_size(config.index.batch_size);

        Ok(Self {
            catalog: Catalog::new(keyspace.clone(), config.servers.clone()),
            generations,
            index,
            engine: QueryEngine::new(keyspace, &config.query),
            session: Arc::new(session),
            config: config.crawl.clone(),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Crawl every online server with at most `max_concurrency` sessions in flight
    ///
    /// A failed crawl is reported in the summary; only store faults during
    /// the post-crawl sweep fail the batch itself.
    pub async fn run_crawl_batch(&self, max_concurrency: usize) -> Result<BatchReport> {
        let started = Instant::now();
        let servers = self.catalog.list_online().context("Failed to list online servers")?;
        info!(
            "Starting crawl batch: {} online servers, concurrency {}",
            servers.len(),
            max_concurrency.max(1)
        );

        let pool = WorkerPool::new(max_concurrency);
        for server in &servers {
            let session = Arc::clone(&self.session);
            let server = server.clone();
            let (connect_retries, list_retries) = (self.config.max_connect_retries, self.config.max_list_retries);
            pool.submit(server.id.clone(), async move {
                match session.crawl(&server, connect_retries, list_retries).await {
                    (recorded, CrawlOutcome::Done { .. }) => Ok(recorded),
                    (_, CrawlOutcome::Failed { reason }) => Err(anyhow!(reason)),
                }
            })
            .await?;
        }

        let mut report = BatchReport {
            attempted: servers.len(),
            ..Default::default()
        };
        for task in pool.drain().await {
            match task.result {
                Ok(recorded) => {
                    report.succeeded += 1;
                    report.entries += recorded;
                }
                Err(reason) => report.failed.push((task.label, reason)),
            }
        }
        report.failed.sort();

        // Every session has terminated, so no pending generation is in use
        for server in &servers {
            report.purged_entries += self
                .generations
                .purge(&server.id)
                .with_context(|| format!("Failed to purge old generations of {}", server.id))?;
        }
        report.postings = self.index.purge_stale().context("Failed to purge stale postings")?;
        for server in &servers {
            self.catalog
                .refresh_aggregates(&server.id)
                .with_context(|| format!("Failed to refresh aggregates of {}", server.id))?;
        }
        self.engine.invalidate().context("Failed to invalidate result cache")?;

        for (server, reason) in &report.failed {
            warn!("on {}: excluded from this batch: {}", server, reason);
        }
        info!(
            "Crawl batch finished in {:.1}s: {}/{} servers crawled, {} entries, {} failed",
            started.elapsed().as_secs_f64(),
            report.succeeded,
            report.attempted,
            report.entries,
            report.failed.len()
        );
        Ok(report)
    }

    /// Rebuild postings for every server's current generation
    pub fn reindex(&self) -> Result<ReindexReport> {
        let servers = self.catalog.servers().context("Failed to list servers")?;
        let mut report = ReindexReport {
            servers: servers.len(),
            ..Default::default()
        };
        for server in &servers {
            report.entries += self
                .index
                .update(&server.id)
                .with_context(|| format!("Failed to index {}", server.id))?;
        }
        report.postings = self.index.purge_stale().context("Failed to purge stale postings")?;
        self.engine.invalidate().context("Failed to invalidate result cache")?;

        info!(
            "Reindexed {} servers: {} entries, {} dangling refs removed",
            report.servers, report.entries, report.postings.removed
        );
        Ok(report)
    }
}
