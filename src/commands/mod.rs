//! Subcommand implementations

pub mod index;
pub mod init;
pub mod search;
pub mod servers;
pub mod stats;

use anyhow::{Context, Result};
use ftpdex::{
    config::Config,
    crawl::{TcpFtpConnector, TokioSleeper},
    orchestrator::Orchestrator,
    store::MemoryKeyspace,
};
use std::sync::Arc;

/// Keyspace plus the subsystems wired over it
pub struct Workspace {
    keyspace: Arc<MemoryKeyspace>,
    pub orchestrator: Orchestrator,
}

impl Workspace {
    pub fn open(config: &Config) -> Result<Self> {
        let keyspace = match &config.store.snapshot_path {
            Some(path) => Arc::new(
                MemoryKeyspace::open(path)
                    .with_context(|| format!("Failed to open keyspace snapshot {}", path.display()))?,
            ),
            None => Arc::new(MemoryKeyspace::new()),
        };

        let orchestrator = Orchestrator::new(
            keyspace.clone(),
            config,
            Arc::new(TcpFtpConnector::new(config.crawl.connect_timeout())),
            Arc::new(TokioSleeper),
        )?;

        Ok(Self { keyspace, orchestrator })
    }

    /// Persist the keyspace snapshot, if one is configured
    pub fn save(&self) -> Result<()> {
        self.keyspace.flush().context("Failed to save keyspace snapshot")
    }
}
