//! Server records and the consumer-facing server APIs
//!
//! The catalog owns `server:{id}` records and the `servers` set. It serves
//! the liveness prober (`report_ping`), listing front ends
//! (`list_servers`, `server_detail`, `stats`) and administration
//! (`rename`, `delete`, `list_entries`).

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ServerDefaults;
use crate::generation::{current_of, entries_of, purge_all_batch, GenerationStore};
use crate::query::cache;
use crate::store::{keys, Keyspace, ReadView, StoreError, WriteBatch};
use crate::types::{Entry, NetworkStats, Server, ServerDetail, ServerId, ServerSummary};

/// Errors reported by catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown server: {0}")]
    UnknownServer(ServerId),

    #[error("Invalid server name: {0:?}")]
    InvalidName(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Whether a liveness report created, updated or ignored a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Created,
    Updated,
    Ignored,
}

/// Registry of known servers
#[derive(Clone)]
pub struct Catalog {
    keyspace: Arc<dyn Keyspace>,
    generations: GenerationStore,
    defaults: ServerDefaults,
}

impl Catalog {
    pub fn new(keyspace: Arc<dyn Keyspace>, defaults: ServerDefaults) -> Self {
        Self {
            generations: GenerationStore::new(keyspace.clone()),
            keyspace,
            defaults,
        }
    }

    // ========================================================================
    // Registration and liveness
    // ========================================================================

    /// Insert or overwrite a server's settings and liveness
    pub fn register(&self, server: &Server) -> Result<(), CatalogError> {
        let mut batch = WriteBatch::new();
        batch
            .add(keys::SERVERS, [server.id.clone()])
            .set_fields(keys::server(&server.id), server.to_record());
        self.keyspace.apply(batch)?;
        debug!("Registered server {}", server.id);
        Ok(())
    }

    /// Record a liveness probe result for `host`
    ///
    /// Unknown hosts are created on their first positive sighting, with the
    /// configured defaults and the host as display name.
    pub fn report_ping(&self, host: &str, is_alive: bool) -> Result<PingOutcome, CatalogError> {
        let mut outcome = PingOutcome::Ignored;
        let now = Utc::now();
        self.keyspace.transact(&mut |view| {
            let mut batch = WriteBatch::new();
            if view.contains(keys::SERVERS, host) {
                outcome = PingOutcome::Updated;
                batch
                    .set_field(keys::server(host), "is_alive", is_alive)
                    .set_field(keys::server(host), "last_ping", now.timestamp());
            } else if is_alive {
                outcome = PingOutcome::Created;
                let mut server = self.defaults.server(host).alive(true);
                server.last_ping = Some(now);
                batch
                    .add(keys::SERVERS, [host])
                    .set_fields(keys::server(host), server.to_record());
            } else {
                outcome = PingOutcome::Ignored;
            }
            Ok(batch)
        })?;

        if outcome == PingOutcome::Created {
            info!("Discovered new server {}", host);
        }
        Ok(outcome)
    }

    // ========================================================================
    // Search consumer API
    // ========================================================================

    pub fn get(&self, id: &str) -> Result<Server, CatalogError> {
        let view = self.keyspace.view()?;
        load(view.as_ref(), id).ok_or_else(|| CatalogError::UnknownServer(id.to_string()))
    }

    /// Every known server, ordered by id
    pub fn servers(&self) -> Result<Vec<Server>, CatalogError> {
        let view = self.keyspace.view()?;
        Ok(view
            .members(keys::SERVERS)
            .iter()
            .filter_map(|id| load(view.as_ref(), id))
            .collect())
    }

    /// Servers currently marked alive, ordered by id
    pub fn list_online(&self) -> Result<Vec<Server>, CatalogError> {
        Ok(self.servers()?.into_iter().filter(|s| s.is_alive).collect())
    }

    pub fn list_servers(&self) -> Result<Vec<ServerSummary>, CatalogError> {
        Ok(self.servers()?.iter().map(ServerSummary::from).collect())
    }

    pub fn server_detail(&self, id: &str) -> Result<ServerDetail, CatalogError> {
        let server = self.get(id)?;
        let generations = self.generations.generations(id)?;
        Ok(ServerDetail {
            summary: ServerSummary::from(&server),
            port: server.port,
            login: server.login.clone(),
            encoding: server.encoding,
            url: server.url(),
            current_generation: server.current_generation,
            generations,
        })
    }

    /// Fleet-wide totals from the cached per-server aggregates
    pub fn stats(&self) -> Result<NetworkStats, CatalogError> {
        let servers = self.servers()?;
        Ok(NetworkStats {
            servers: servers.len(),
            online: servers.iter().filter(|s| s.is_alive).count(),
            total_files: servers.iter().fold(0u64, |acc, s| acc.saturating_add(s.total_files)),
            total_size: servers.iter().fold(0u64, |acc, s| acc.saturating_add(s.total_size)),
            last_ping: servers.iter().filter_map(|s| s.last_ping).max(),
            last_crawl: servers.iter().filter_map(|s| s.last_crawl).max(),
        })
    }

    // ========================================================================
    // Admin consumer API
    // ========================================================================

    pub fn rename(&self, id: &str, name: &str) -> Result<(), CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        let mut found = false;
        self.keyspace.transact(&mut |view| {
            found = view.contains(keys::SERVERS, id);
            let mut batch = WriteBatch::new();
            if found {
                batch.set_field(keys::server(id), "name", name);
            }
            Ok(batch)
        })?;

        if !found {
            return Err(CatalogError::UnknownServer(id.to_string()));
        }
        info!("Renamed server {} to {:?}", id, name);
        Ok(())
    }

    /// Forget a server with all its generations and entries
    ///
    /// Postings referencing its entries are left for the next stale sweep.
    pub fn delete(&self, id: &str) -> Result<usize, CatalogError> {
        let mut found = false;
        let mut removed = 0;
        self.keyspace.transact(&mut |view| {
            found = view.contains(keys::SERVERS, id);
            let mut batch = WriteBatch::new();
            if !found {
                return Ok(batch);
            }

            // Record, pointer and generations disappear together
            let (purge, entries) = purge_all_batch(view, id);
            removed = entries;
            batch
                .extend(purge)
                .remove(keys::SERVERS, [id])
                .delete(keys::server(id));
            cache::bump_epoch(view, &mut batch);
            Ok(batch)
        })?;

        if !found {
            return Err(CatalogError::UnknownServer(id.to_string()));
        }

        info!("Deleted server {} ({} entries)", id, removed);
        Ok(removed)
    }

    /// Entries of the server's current generation, ordered by path
    pub fn list_entries(&self, id: &str) -> Result<Vec<Entry>, CatalogError> {
        let view = self.keyspace.view()?;
        if !view.contains(keys::SERVERS, id) {
            return Err(CatalogError::UnknownServer(id.to_string()));
        }
        Ok(match current_of(view.as_ref(), id) {
            Some(generation) => entries_of(view.as_ref(), id, generation),
            None => Vec::new(),
        })
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Recompute cached file count and size of `id` from its current generation
    pub fn refresh_aggregates(&self, id: &str) -> Result<(u64, u64), CatalogError> {
        let mut totals = (0, 0);
        let mut found = false;
        self.keyspace.transact(&mut |view| {
            found = view.contains(keys::SERVERS, id);
            let mut batch = WriteBatch::new();
            if !found {
                return Ok(batch);
            }

            let (files, size) = match current_of(view, id) {
                Some(generation) => entries_of(view, id, generation)
                    .iter()
                    .filter(|entry| !entry.is_dir)
                    .fold((0u64, 0u64), |(files, size), entry| {
                        (files.saturating_add(1), size.saturating_add(entry.size))
                    }),
                None => (0, 0),
            };
            totals = (files, size);
            batch
                .set_field(keys::server(id), "total_files", files)
                .set_field(keys::server(id), "total_size", size);
            Ok(batch)
        })?;

        if !found {
            return Err(CatalogError::UnknownServer(id.to_string()));
        }
        Ok(totals)
    }
}

fn load(view: &dyn ReadView, id: &str) -> Option<Server> {
    view.record(&keys::server(id))
        .and_then(|record| Server::from_record(&record))
}
