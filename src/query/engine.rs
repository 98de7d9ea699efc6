//! Search evaluation

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use super::cache::{self, ResultCache};
use super::sort::SortOrder;
use super::terms::parse_terms;
use crate::config::QueryConfig;
use crate::generation::current_of;
use crate::store::{keys, Keyspace, ReadView, StoreError};
use crate::types::{parse_field, Entry, EntryRef, GenerationId, SearchHit, SearchPage};

/// Answers keyword searches over the current generation of every server
#[derive(Clone)]
pub struct QueryEngine {
    keyspace: Arc<dyn Keyspace>,
    cache: ResultCache,
    page_size: usize,
    default_sort: SortOrder,
}

impl QueryEngine {
    pub fn new(keyspace: Arc<dyn Keyspace>, config: &QueryConfig) -> Self {
        let default_sort = config.default_sort.parse().unwrap_or_else(|e| {
            warn!("{}, sorting by server", e);
            SortOrder::default()
        });
        Self {
            cache: ResultCache::new(keyspace.clone(), config.cache_ttl()),
            keyspace,
            page_size: config.page_size.max(1),
            default_sort,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Drop every cached candidate set
    pub fn invalidate(&self) -> Result<(), StoreError> {
        self.cache.invalidate()
    }

    /// Run one search and return the requested page
    ///
    /// Every term must appear in a result's basename. Pages start at 1 and
    /// smaller numbers are clamped; a page past the end is empty. An unknown
    /// `sort` falls back to the configured default, and unparsable query
    /// text yields an empty page.
    pub fn search(
        &self,
        query: &str,
        page: usize,
        sort: Option<&str>,
        online_only: bool,
    ) -> Result<SearchPage, StoreError> {
        let terms = match parse_terms(query) {
            Ok(terms) => terms,
            Err(e) => {
                debug!("Unparsable query {:?}: {}", query, e);
                return Ok(SearchPage::default());
            }
        };
        let order = sort
            .and_then(|s| s.parse::<SortOrder>().ok())
            .unwrap_or(self.default_sort);
        let digest = cache::digest(&terms);

        let (result, fresh) = {
            let view = self.keyspace.view()?;
            let epoch = cache::current_epoch(view.as_ref());
            let mut servers = ServerLookup::new(view.as_ref());

            let (candidates, hit) = match self.cache.lookup(view.as_ref(), &digest) {
                Some(cached) => (cached, true),
                None => (candidates(view.as_ref(), &terms), false),
            };
            // Refs of non-current generations never surface
            let visible: BTreeSet<String> = candidates
                .into_iter()
                .filter(|member| servers.is_current(member))
                .collect();

            let filtered: BTreeSet<String> = if online_only {
                visible
                    .iter()
                    .filter(|member| servers.is_online(member))
                    .cloned()
                    .collect()
            } else {
                visible.clone()
            };

            let result = self.paginate(view.as_ref(), &filtered, page, order);
            debug!(
                "Query {:?}: {} candidates, {} shown (cache {})",
                terms,
                filtered.len(),
                result.hits.len(),
                if hit { "hit" } else { "miss" }
            );
            (result, (!hit).then_some((epoch, visible)))
        };

        if let Some((epoch, visible)) = fresh {
            self.cache.store(epoch, &digest, &visible)?;
        }
        Ok(result)
    }

    fn paginate(
        &self,
        view: &dyn ReadView,
        members: &BTreeSet<String>,
        page: usize,
        order: SortOrder,
    ) -> SearchPage {
        let total = members.len();
        let page_count = total.div_ceil(self.page_size);
        let offset = (page.max(1) - 1).saturating_mul(self.page_size);
        if offset >= total {
            return SearchPage {
                page_count,
                total,
                hits: Vec::new(),
            };
        }

        let hits = view
            .sort(members, &order.spec().window(offset, self.page_size))
            .into_iter()
            .filter_map(|member| {
                view.record(&format!("{}{}", keys::ENTRY_PREFIX, member))
                    .and_then(|record| Entry::from_record(&record))
                    .map(SearchHit::from)
            })
            .collect();

        SearchPage {
            page_count,
            total,
            hits,
        }
    }
}

/// Term intersection, or every current entry for an empty query
fn candidates(view: &dyn ReadView, terms: &[String]) -> BTreeSet<String> {
    if !terms.is_empty() {
        let posting_keys: Vec<String> = terms.iter().map(|term| keys::posting(term)).collect();
        return view.intersect(&posting_keys);
    }

    let mut all = BTreeSet::new();
    for server in view.members(keys::SERVERS) {
        if let Some(generation) = current_of(view, &server) {
            for path in view.members(&keys::generation_entries(&server, generation)) {
                all.insert(EntryRef::new(server.clone(), generation, path).to_string());
            }
        }
    }
    all
}

/// Per-query memo of server pointers and liveness
struct ServerLookup<'v> {
    view: &'v dyn ReadView,
    servers: HashMap<String, (Option<GenerationId>, bool)>,
}

impl<'v> ServerLookup<'v> {
    fn new(view: &'v dyn ReadView) -> Self {
        Self {
            view,
            servers: HashMap::new(),
        }
    }

    fn server(&mut self, id: &str) -> (Option<GenerationId>, bool) {
        let view = self.view;
        *self.servers.entry(id.to_string()).or_insert_with(|| {
            match view.record(&keys::server(id)) {
                Some(record) => (
                    parse_field(&record, "current_generation"),
                    parse_field(&record, "is_alive").unwrap_or(false),
                ),
                None => (None, false),
            }
        })
    }

    fn is_current(&mut self, member: &str) -> bool {
        match member.parse::<EntryRef>() {
            Ok(entry_ref) => self.server(&entry_ref.server).0 == Some(entry_ref.generation),
            Err(_) => false,
        }
    }

    fn is_online(&mut self, member: &str) -> bool {
        match member.parse::<EntryRef>() {
            Ok(entry_ref) => self.server(&entry_ref.server).1,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationStore;
    use crate::index::IndexBuilder;
    use crate::store::{MemoryKeyspace, WriteBatch};
    use crate::types::Server;

    struct Fixture {
        keyspace: Arc<MemoryKeyspace>,
        generations: GenerationStore,
        index: IndexBuilder,
        engine: QueryEngine,
    }

    fn fixture() -> Fixture {
        let keyspace = Arc::new(MemoryKeyspace::new());
        Fixture {
            generations: GenerationStore::new(keyspace.clone()),
            index: IndexBuilder::new(keyspace.clone(), &crate::config::IndexConfig::default()).unwrap(),
            engine: QueryEngine::new(keyspace.clone(), &QueryConfig::default()),
            keyspace,
        }
    }

    impl Fixture {
        fn server(&self, host: &str, alive: bool) {
            let mut batch = WriteBatch::new();
            batch
                .add(keys::SERVERS, [host])
                .set_fields(keys::server(host), Server::new(host).alive(alive).to_record());
            self.keyspace.apply(batch).unwrap();
        }

        /// Crawl-equivalent: record, index, promote, purge
        fn publish(&self, host: &str, files: &[(&str, u64)]) -> GenerationId {
            let g = self.generations.begin(host).unwrap();
            let entries: Vec<Entry> = files
                .iter()
                .map(|(path, size)| Entry {
                    server: host.to_string(),
                    path: path.to_string(),
                    name: path.rsplit('/').next().unwrap_or(path).to_string(),
                    is_dir: false,
                    size: *size,
                    modified: None,
                    generation: g,
                })
                .collect();
            self.generations.record_batch(host, g, &entries).unwrap();
            self.index.index_generation(host, g).unwrap();
            self.generations.promote(host, g).unwrap();
            self.generations.purge(host).unwrap();
            self.index.purge_stale().unwrap();
            g
        }
    }

    fn paths(page: &SearchPage) -> Vec<String> {
        page.hits.iter().map(|h| format!("{}{}", h.server, h.path)).collect()
    }

    #[test]
    fn test_and_semantics() {
        let fx = fixture();
        fx.server("a", true);
        fx.publish("a", &[("/Foo Bar.mkv", 1), ("/foo.txt", 2), ("/bar.txt", 3)]);

        let both = fx.engine.search("foo BAR", 1, None, false).unwrap();
        assert_eq!(paths(&both), vec!["a/Foo Bar.mkv"]);

        let none = fx.engine.search("foo missing", 1, None, false).unwrap();
        assert_eq!(none.page_count, 0);
        assert!(none.hits.is_empty());
    }

    #[test]
    fn test_pagination_math() {
        let fx = fixture();
        fx.server("a", true);
        let files: Vec<(String, u64)> = (0..45).map(|i| (format!("/item {:02}.bin", i), i)).collect();
        let files: Vec<(&str, u64)> = files.iter().map(|(p, s)| (p.as_str(), *s)).collect();
        fx.publish("a", &files);

        let first = fx.engine.search("item", 1, Some("size"), false).unwrap();
        assert_eq!(first.page_count, 3);
        assert_eq!(first.total, 45);
        assert_eq!(first.hits.len(), 20);
        assert_eq!(first.hits[0].size, 0);
        assert_eq!(first.hits[19].size, 19);

        let last = fx.engine.search("item", 3, Some("size"), false).unwrap();
        assert_eq!(last.hits.len(), 5);
        assert!(fx.engine.search("item", 4, None, false).unwrap().hits.is_empty());
        // Page 0 is clamped to the first page
        assert_eq!(fx.engine.search("item", 0, Some("size"), false).unwrap().hits, first.hits);
    }

    #[test]
    fn test_sorting_with_path_tiebreak() {
        let fx = fixture();
        fx.server("b", true);
        fx.server("a", true);
        fx.publish("b", &[("/x/song.mp3", 5), ("/y/song.mp3", 5)]);
        fx.publish("a", &[("/song.mp3", 9)]);

        let by_server = fx.engine.search("song", 1, None, false).unwrap();
        assert_eq!(paths(&by_server), vec!["a/song.mp3", "b/x/song.mp3", "b/y/song.mp3"]);

        let by_size = fx.engine.search("song", 1, Some("size.desc"), false).unwrap();
        assert_eq!(paths(&by_size), vec!["a/song.mp3", "b/x/song.mp3", "b/y/song.mp3"]);

        let by_size_asc = fx.engine.search("song", 1, Some("size"), false).unwrap();
        assert_eq!(paths(&by_size_asc), vec!["b/x/song.mp3", "b/y/song.mp3", "a/song.mp3"]);

        // Unknown sort falls back to the default
        let fallback = fx.engine.search("song", 1, Some("bogus"), false).unwrap();
        assert_eq!(fallback.hits, by_server.hits);
    }

    #[test]
    fn test_online_filter_applies_before_pagination() {
        let fx = fixture();
        fx.server("up", true);
        fx.server("down", false);
        fx.publish("up", &[("/a.iso", 1)]);
        fx.publish("down", &[("/b.iso", 1), ("/c.iso", 1)]);

        let all = fx.engine.search("iso", 1, None, false).unwrap();
        assert_eq!(all.total, 3);
        let online = fx.engine.search("iso", 1, None, true).unwrap();
        assert_eq!(online.total, 1);
        assert_eq!(online.page_count, 1);
        assert_eq!(paths(&online), vec!["up/a.iso"]);
    }

    #[test]
    fn test_empty_query_lists_current_entries() {
        let fx = fixture();
        fx.server("a", true);
        fx.publish("a", &[("/one", 1), ("/two", 2)]);
        fx.publish("a", &[("/three", 3)]);

        let page = fx.engine.search("", 1, Some("name"), false).unwrap();
        assert_eq!(paths(&page), vec!["a/three"]);
    }

    #[test]
    fn test_malformed_query_degrades_to_empty_page() {
        let fx = fixture();
        fx.server("a", true);
        fx.publish("a", &[("/x", 1)]);
        assert_eq!(fx.engine.search("\"x", 1, None, false).unwrap(), SearchPage::default());
    }

    #[test]
    fn test_cache_is_reused_until_generation_changes() {
        let fx = fixture();
        fx.server("a", true);
        fx.publish("a", &[("/movie.avi", 1)]);

        let first = fx.engine.search("movie", 1, None, false).unwrap();
        let second = fx.engine.search("movie", 1, None, false).unwrap();
        assert_eq!(first, second);
        {
            let view = fx.keyspace.view().unwrap();
            assert_eq!(view.keys_with_prefix(keys::RESULTS_PREFIX).len(), 1);
        }

        fx.publish("a", &[("/movie.avi", 1), ("/movie 2.avi", 2)]);
        let third = fx.engine.search("movie", 1, Some("size"), false).unwrap();
        assert_eq!(third.total, 2);
    }

    #[test]
    fn test_pending_generation_is_invisible() {
        let fx = fixture();
        fx.server("a", true);
        fx.publish("a", &[("/old.txt", 1)]);

        let g = fx.generations.begin("a").unwrap();
        let entry = Entry {
            server: "a".into(),
            path: "/new.txt".into(),
            name: "new.txt".into(),
            is_dir: false,
            size: 1,
            modified: None,
            generation: g,
        };
        fx.generations.record("a", g, &entry).unwrap();
        fx.index.index_generation("a", g).unwrap();

        assert_eq!(paths(&fx.engine.search("txt", 1, None, false).unwrap()), vec!["a/old.txt"]);
        fx.generations.promote("a", g).unwrap();
        assert_eq!(paths(&fx.engine.search("txt", 1, None, false).unwrap()), vec!["a/new.txt"]);
    }
}
