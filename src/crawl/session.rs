//! One server's crawl: connect, walk, record, promote

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::encoding::{decode_line, encode_path};
use super::ftp::{FtpClient, FtpConnector, FtpError};
use super::listing::parse_line;
use super::retry::{RetryPolicy, Sleeper};
use crate::config::CrawlConfig;
use crate::generation::GenerationStore;
use crate::index::IndexBuilder;
use crate::types::{join_path, Entry, GenerationId, Server};

/// Crawl state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Connecting,
    Listing,
    Recursing,
    Closing,
    Done,
    Failed,
}

/// Terminal result of a crawl session
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlOutcome {
    /// The walk finished and its generation is now current
    Done {
        generation: GenerationId,
        previous: Option<GenerationId>,
        /// Directories given up after their listing retries ran out
        abandoned_dirs: usize,
        elapsed: Duration,
    },
    /// Nothing was promoted; the previous current generation is untouched
    Failed { reason: String },
}

impl CrawlOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, CrawlOutcome::Done { .. })
    }
}

/// A directory waiting to be listed
struct PendingDir {
    /// Decoded absolute path, empty for the root
    path: String,
    /// Path as sent to the server
    raw: Option<Vec<u8>>,
    depth: usize,
}

/// Runs crawls against servers reached through an [`FtpConnector`]
pub struct CrawlSession {
    generations: GenerationStore,
    index: IndexBuilder,
    connector: Arc<dyn FtpConnector>,
    sleeper: Arc<dyn Sleeper>,
    config: CrawlConfig,
    batch_size: usize,
}

impl CrawlSession {
    pub fn new(
        generations: GenerationStore,
        index: IndexBuilder,
        connector: Arc<dyn FtpConnector>,
        sleeper: Arc<dyn Sleeper>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            generations,
            index,
            connector,
            sleeper,
            config,
            batch_size: 1000,
        }
    }

    /// Entries buffered before each store write
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Crawl `server` into a new generation and promote it on success
    ///
    /// Returns the number of entries recorded and how the session ended.
    pub async fn crawl(
        &self,
        server: &Server,
        max_connect_retries: u32,
        max_list_retries: u32,
    ) -> (usize, CrawlOutcome) {
        let started = Instant::now();
        let host = server.id.as_str();
        info!("on {}: starting crawl of {}", host, server.name);

        let generation = match self.generations.begin(host) {
            Ok(generation) => generation,
            Err(e) => return (0, failed(host, format!("cannot begin generation: {}", e))),
        };

        let mut client = self.connector.client();
        let mut walk = Walk {
            session: self,
            server,
            generation,
            client: client.as_mut(),
            connect: RetryPolicy::new(max_connect_retries, self.config.retry_delay()),
            max_list_retries,
            buffer: Vec::with_capacity(self.batch_size),
            recorded: 0,
            abandoned_dirs: 0,
            state: CrawlState::Connecting,
        };

        let result = walk.run().await;
        walk.close().await;
        let (recorded, abandoned_dirs) = (walk.recorded, walk.abandoned_dirs);

        if let Err(reason) = result {
            return (recorded, failed(host, reason));
        }

        // Postings go in before the pointer flips so search switches in one step
        if let Err(e) = self.index.index_generation(host, generation) {
            return (recorded, failed(host, format!("cannot index generation {}: {}", generation, e)));
        }
        let previous = match self.generations.promote(host, generation) {
            Ok(previous) => previous,
            Err(e) => return (recorded, failed(host, format!("cannot promote generation {}: {}", generation, e))),
        };

        let elapsed = started.elapsed();
        let rate = recorded as f64 / elapsed.as_secs_f64().max(0.001);
        info!(
            "on {}: finished crawl in {:.1}s, {} entries ({:.0} entries/s), {} directories abandoned",
            host,
            elapsed.as_secs_f64(),
            recorded,
            rate,
            abandoned_dirs
        );

        (
            recorded,
            CrawlOutcome::Done {
                generation,
                previous,
                abandoned_dirs,
                elapsed,
            },
        )
    }
}

fn failed(host: &str, reason: String) -> CrawlOutcome {
    warn!("on {}: crawl failed: {}", host, reason);
    CrawlOutcome::Failed { reason }
}

/// Mutable state of one running crawl
struct Walk<'a> {
    session: &'a CrawlSession,
    server: &'a Server,
    generation: GenerationId,
    client: &'a mut dyn FtpClient,
    connect: RetryPolicy,
    max_list_retries: u32,
    buffer: Vec<Entry>,
    recorded: usize,
    abandoned_dirs: usize,
    state: CrawlState,
}

impl Walk<'_> {
    async fn run(&mut self) -> Result<(), String> {
        self.connect_with_retries().await?;

        let mut stack = vec![PendingDir {
            path: String::new(),
            raw: None,
            depth: 0,
        }];

        while let Some(dir) = stack.pop() {
            self.state = CrawlState::Listing;
            let Some(lines) = self.list_with_retries(&dir).await else {
                // Without the root there is nothing worth promoting
                if dir.depth == 0 {
                    return Err(format!(
                        "root listing failed after {} reconnects",
                        self.max_list_retries
                    ));
                }
                self.abandoned_dirs += 1;
                continue;
            };

            let children = self.accept_lines(&dir, &lines)?;

            self.state = CrawlState::Recursing;
            // Reversed so the first child is listed next
            stack.extend(children.into_iter().rev());
        }

        self.flush()
    }

    /// Release the connection whatever phase the walk stopped in
    async fn close(&mut self) {
        let phase = std::mem::replace(&mut self.state, CrawlState::Closing);
        self.client.close().await;
        debug!("on {}: connection closed during {:?}", self.server.id, phase);
    }

    async fn open(&mut self) -> Result<(), FtpError> {
        let server = self.server;
        self.client
            .connect(&server.id, server.port, &server.login, &server.password)
            .await?;
        self.client.set_passive(true).await
    }

    async fn connect_with_retries(&mut self) -> Result<(), String> {
        let host = self.server.id.clone();
        let mut attempt = 1;
        loop {
            match self.open().await {
                Ok(()) => {
                    debug!("on {}: connected (attempt {})", host, attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "on {}: connection attempt {}/{} failed: {}",
                        host, attempt, self.connect.max_attempts, e
                    );
                    if !self.connect.allows_retry(attempt) {
                        return Err(format!("connection failed after {} attempts: {}", attempt, e));
                    }
                    self.client.close().await;
                    self.session.sleeper.sleep(self.connect.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Listing of `dir`, reconnecting on failure; `None` once the budget is spent
    async fn list_with_retries(&mut self, dir: &PendingDir) -> Option<Vec<Vec<u8>>> {
        let host = self.server.id.clone();
        let delay = self.session.config.retry_delay();
        let mut reconnects = 0;
        loop {
            let result = if self.client.is_connected() {
                self.client.list(dir.raw.as_deref()).await
            } else {
                Err(FtpError::NotConnected)
            };

            match result {
                Ok(lines) => return Some(lines),
                Err(e) => {
                    let shown = if dir.path.is_empty() { "/" } else { dir.path.as_str() };
                    warn!("on {}: LIST {} failed: {}", host, shown, e);
                    if reconnects >= self.max_list_retries {
                        warn!("on {}: abandoning {} after {} reconnects", host, shown, reconnects);
                        return None;
                    }
                    reconnects += 1;

                    self.client.close().await;
                    self.session.sleeper.sleep(delay).await;
                    match self.open().await {
                        Ok(()) => info!("on {}: reconnected ({}/{})", host, reconnects, self.max_list_retries),
                        Err(e) => warn!("on {}: reconnect failed: {}", host, e),
                    }
                }
            }
        }
    }

    /// Record the accepted lines of one listing and return subdirectories to walk
    fn accept_lines(&mut self, dir: &PendingDir, lines: &[Vec<u8>]) -> Result<Vec<PendingDir>, String> {
        let (server, session) = (self.server, self.session);
        let config = &session.config;
        let ignored = server.ignored_names.as_ref().unwrap_or(&config.ignored_names);
        let now = Utc::now();
        let mut children = Vec::new();

        for raw in lines {
            let line = match decode_line(raw, server.encoding, server.force_utf8) {
                Ok(line) => line,
                Err(e) => {
                    warn!("on {}: skipped line in {}: {}", server.id, dir.path, e);
                    continue;
                }
            };
            let parsed = match parse_line(&line, now) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(e) => {
                    warn!("on {}: skipped line in {}: {}", server.id, dir.path, e);
                    continue;
                }
            };
            if ignored.iter().any(|name| *name == parsed.name) {
                continue;
            }

            let path = join_path(&dir.path, &parsed.name);
            if parsed.is_dir {
                if dir.depth + 1 > config.max_depth {
                    debug!("on {}: not descending into {} (depth limit)", server.id, path);
                } else {
                    match encode_path(&path, server.encoding, server.force_utf8) {
                        Ok(raw) => children.push(PendingDir {
                            path: path.clone(),
                            raw: Some(raw),
                            depth: dir.depth + 1,
                        }),
                        Err(e) => warn!("on {}: cannot descend into {}: {}", server.id, path, e),
                    }
                }
            }

            self.buffer.push(Entry {
                server: server.id.clone(),
                name: parsed.name,
                path,
                is_dir: parsed.is_dir,
                size: parsed.size,
                modified: parsed.modified,
                generation: self.generation,
            });
            if self.buffer.len() >= session.batch_size {
                self.flush()?;
            }
        }

        Ok(children)
    }

    fn flush(&mut self) -> Result<(), String> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let recorded = self
            .session
            .generations
            .record_batch(&self.server.id, self.generation, &self.buffer)
            .map_err(|e| format!("cannot record entries: {}", e))?;
        self.recorded += recorded;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::RecordingSleeper;
    use crate::store::{Keyspace, MemoryKeyspace};
    use crate::types::GenerationState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scripted FTP server shared by every client it hands out
    #[derive(Default)]
    struct MockState {
        tree: HashMap<String, Vec<Vec<u8>>>,
        connect_failures: u32,
        list_failures: HashMap<String, u32>,
        connects: u32,
        closes: u32,
        listed: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct MockFtp(Arc<Mutex<MockState>>);

    impl MockFtp {
        fn dir(self, path: &str, lines: &[&str]) -> Self {
            self.0.lock().tree.insert(
                path.to_string(),
                lines.iter().map(|l| l.as_bytes().to_vec()).collect(),
            );
            self
        }

        fn raw_dir(self, path: &str, lines: Vec<Vec<u8>>) -> Self {
            self.0.lock().tree.insert(path.to_string(), lines);
            self
        }

        fn failing_connects(self, count: u32) -> Self {
            self.0.lock().connect_failures = count;
            self
        }

        fn failing_lists(self, path: &str, count: u32) -> Self {
            self.0.lock().list_failures.insert(path.to_string(), count);
            self
        }
    }

    struct MockClient {
        state: Arc<Mutex<MockState>>,
        connected: bool,
    }

    #[async_trait]
    impl FtpClient for MockClient {
        async fn connect(&mut self, _: &str, _: u16, _: &str, _: &str) -> Result<(), FtpError> {
            let mut state = self.state.lock();
            state.connects += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(FtpError::ConnectionFailed("refused".into()));
            }
            self.connected = true;
            Ok(())
        }

        async fn set_passive(&mut self, _: bool) -> Result<(), FtpError> {
            Ok(())
        }

        async fn list(&mut self, path: Option<&[u8]>) -> Result<Vec<Vec<u8>>, FtpError> {
            let path = path.map(|p| String::from_utf8_lossy(p).into_owned()).unwrap_or_default();
            let mut state = self.state.lock();
            state.listed.push(path.clone());
            if let Some(left) = state.list_failures.get_mut(&path) {
                if *left > 0 {
                    *left -= 1;
                    self.connected = false;
                    return Err(FtpError::ConnectionFailed("dropped".into()));
                }
            }
            Ok(state.tree.get(&path).cloned().unwrap_or_default())
        }

        async fn close(&mut self) {
            if self.connected {
                self.state.lock().closes += 1;
            }
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    impl FtpConnector for MockFtp {
        fn client(&self) -> Box<dyn FtpClient> {
            Box::new(MockClient {
                state: self.0.clone(),
                connected: false,
            })
        }
    }

    fn tree() -> MockFtp {
        MockFtp::default()
            .dir(
                "",
                &[
                    "total 3",
                    "drwxr-xr-x 2 ftp ftp 4096 Oct 16 2010 pub",
                    "drwxr-xr-x 2 ftp ftp 4096 Oct 16 2010 .svn",
                    "-rw-r--r-- 1 ftp ftp 100 Oct 16 2010 readme.txt",
                ],
            )
            .dir(
                "/pub",
                &[
                    "drwxr-xr-x 2 ftp ftp 4096 Oct 16 2010 linux",
                    "-rw-r--r-- 1 ftp ftp 2048 Oct 16 2010 Foo_Bar (2020).mkv",
                ],
            )
            .dir("/pub/linux", &["-rw-r--r-- 1 ftp ftp 700 Oct 16 2010 debian.iso"])
    }

    struct Fixture {
        keyspace: Arc<MemoryKeyspace>,
        sleeper: Arc<RecordingSleeper>,
        session: CrawlSession,
    }

    fn fixture(ftp: MockFtp) -> Fixture {
        let keyspace = Arc::new(MemoryKeyspace::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let ks: Arc<dyn Keyspace> = keyspace.clone();
        let session = CrawlSession::new(
            GenerationStore::new(ks.clone()),
            IndexBuilder::new(ks, &crate::config::IndexConfig::default()).unwrap(),
            Arc::new(ftp),
            sleeper.clone(),
            CrawlConfig::default(),
        )
        .with_batch_size(2);
        Fixture {
            keyspace,
            sleeper,
            session,
        }
    }

    /// A second session over the same keyspace, talking to another server
    fn fixture_with_keyspace(fx: &Fixture, ftp: MockFtp) -> CrawlSession {
        let ks: Arc<dyn Keyspace> = fx.keyspace.clone();
        CrawlSession::new(
            GenerationStore::new(ks.clone()),
            IndexBuilder::new(ks, &crate::config::IndexConfig::default()).unwrap(),
            Arc::new(ftp),
            fx.sleeper.clone(),
            CrawlConfig::default(),
        )
        .with_batch_size(2)
    }

    fn generations(fx: &Fixture) -> GenerationStore {
        GenerationStore::new(fx.keyspace.clone())
    }

    #[tokio::test]
    async fn test_full_walk_is_depth_first_and_promoted() {
        let ftp = tree();
        let fx = fixture(ftp.clone());
        let server = Server::new("10.0.0.1");

        let (count, outcome) = fx.session.crawl(&server, 3, 1).await;
        assert_eq!(count, 5);
        assert!(outcome.is_done());

        let state = ftp.0.lock();
        assert_eq!(state.listed, vec!["", "/pub", "/pub/linux"]);
        assert_eq!(state.closes, 1);
        drop(state);

        let store = generations(&fx);
        let current = store.current("10.0.0.1").unwrap().unwrap();
        let paths: Vec<String> = store
            .entries("10.0.0.1", current)
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(
            paths,
            vec!["/pub", "/pub/Foo_Bar (2020).mkv", "/pub/linux", "/pub/linux/debian.iso", "/readme.txt"]
        );
    }

    #[tokio::test]
    async fn test_connect_budget_exhaustion_fails_session() {
        let ftp = tree().failing_connects(5);
        let fx = fixture(ftp.clone());

        let (count, outcome) = fx.session.crawl(&Server::new("h"), 3, 1).await;
        assert_eq!(count, 0);
        assert!(matches!(outcome, CrawlOutcome::Failed { .. }));
        assert_eq!(ftp.0.lock().connects, 3);
        assert_eq!(fx.sleeper.delays(), vec![Duration::from_secs(30); 2]);

        let store = generations(&fx);
        assert_eq!(store.current("h").unwrap(), None);
        assert_eq!(
            store.generations("h").unwrap(),
            vec![(GenerationId(1), GenerationState::Pending)]
        );
    }

    #[tokio::test]
    async fn test_connect_recovers_within_budget() {
        let ftp = tree().failing_connects(2);
        let fx = fixture(ftp);
        let (count, outcome) = fx.session.crawl(&Server::new("h"), 3, 1).await;
        assert!(outcome.is_done());
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_list_failure_reconnects_and_relists() {
        let ftp = tree().failing_lists("/pub", 1);
        let fx = fixture(ftp.clone());

        let (count, outcome) = fx.session.crawl(&Server::new("h"), 3, 1).await;
        assert_eq!(count, 5);
        assert!(matches!(outcome, CrawlOutcome::Done { abandoned_dirs: 0, .. }));
        assert_eq!(ftp.0.lock().connects, 2);
    }

    #[tokio::test]
    async fn test_exhausted_list_budget_abandons_only_that_branch() {
        let ftp = tree().failing_lists("/pub", 10);
        let fx = fixture(ftp);

        let (count, outcome) = fx.session.crawl(&Server::new("h"), 3, 2).await;
        // pub and readme.txt from the root listing only
        assert_eq!(count, 2);
        assert!(matches!(outcome, CrawlOutcome::Done { abandoned_dirs: 1, .. }));
        assert_eq!(fx.sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_root_listing_keeps_previous_generation() {
        let fx = fixture(tree());
        let server = Server::new("h");
        let (_, outcome) = fx.session.crawl(&server, 3, 1).await;
        assert!(outcome.is_done());
        let store = generations(&fx);
        let before = store.current("h").unwrap().unwrap();

        let broken = fixture_with_keyspace(&fx, tree().failing_lists("", 10));
        let (count, outcome) = broken.crawl(&server, 3, 2).await;
        assert_eq!(count, 0);
        assert!(matches!(outcome, CrawlOutcome::Failed { .. }));

        assert_eq!(store.current("h").unwrap(), Some(before));
        assert_eq!(store.entries("h", before).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_undecodable_and_garbage_lines_are_skipped() {
        let ftp = MockFtp::default().raw_dir(
            "",
            vec![
                b"-rw-r--r-- 1 ftp ftp 1 Oct 16 2010 caf\xe9.txt".to_vec(),
                b"garbage line".to_vec(),
                b"-rw-r--r-- 1 ftp ftp 2 Oct 16 2010 ok.txt".to_vec(),
            ],
        );
        let fx = fixture(ftp);
        let mut server = Server::new("h");
        server.encoding = crate::types::TextEncoding::Utf8;

        let (count, outcome) = fx.session.crawl(&server, 1, 0).await;
        assert!(outcome.is_done());
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_latin1_listing_and_per_server_ignore_list() {
        let ftp = MockFtp::default()
            .raw_dir(
                "",
                vec![
                    b"drwxr-xr-x 2 ftp ftp 4096 Oct 16 2010 caf\xe9".to_vec(),
                    b"drwxr-xr-x 2 ftp ftp 4096 Oct 16 2010 private".to_vec(),
                ],
            )
            .raw_dir("/caf\u{fffd}", vec![b"-rw-r--r-- 1 ftp ftp 3 Oct 16 2010 menu".to_vec()]);
        let fx = fixture(ftp.clone());
        let mut server = Server::new("h");
        server.ignored_names = Some(vec!["private".into()]);

        let (count, _) = fx.session.crawl(&server, 1, 0).await;
        assert_eq!(count, 2);
        // The raw Latin-1 path goes back on the wire
        assert_eq!(ftp.0.lock().listed, vec!["".to_string(), "/caf\u{fffd}".to_string()]);
    }

    #[tokio::test]
    async fn test_depth_limit_stops_descent() {
        let fx = {
            let keyspace = Arc::new(MemoryKeyspace::new());
            let ks: Arc<dyn Keyspace> = keyspace.clone();
            let config = CrawlConfig {
                max_depth: 1,
                ..CrawlConfig::default()
            };
            Fixture {
                session: CrawlSession::new(
                    GenerationStore::new(ks.clone()),
                    IndexBuilder::new(ks, &crate::config::IndexConfig::default()).unwrap(),
                    Arc::new(tree()),
                    Arc::new(RecordingSleeper::new()),
                    config,
                ),
                keyspace,
                sleeper: Arc::new(RecordingSleeper::new()),
            }
        };
        let (count, _) = fx.session.crawl(&Server::new("h"), 1, 0).await;
        // linux is recorded but not listed
        assert_eq!(count, 4);
    }
}
