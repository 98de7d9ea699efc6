//! Core types for the ftpdex system

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::Record;

/// Server identifier (host address)
pub type ServerId = String;

// ============================================================================
// Generations
// ============================================================================

/// Monotonic per-server snapshot version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenerationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(GenerationId)
    }
}

/// Lifecycle state of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// Being filled by a crawl, invisible to search
    Pending,
    /// The one generation search reads for its server
    Current,
    /// Superseded, awaiting purge
    Stale,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Current => "current",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "current" => Ok(Self::Current),
            "stale" => Ok(Self::Stale),
            other => Err(format!("unknown generation state '{}'", other)),
        }
    }
}

// ============================================================================
// Servers
// ============================================================================

/// Character encoding used by a server's directory listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "iso-8859-1", alias = "latin1")]
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "iso-8859-1",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Self::Latin1),
            other => Err(format!("unsupported encoding '{}'", other)),
        }
    }
}

/// One FTP server of the fleet
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    /// Host address, also the identifier
    pub id: ServerId,
    /// Display name
    pub name: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    /// Encoding of listing lines
    pub encoding: TextEncoding,
    /// Convert listing lines to UTF-8 before parsing
    pub force_utf8: bool,
    /// Per-server ignore list, overriding the configured one
    pub ignored_names: Option<Vec<String>>,
    /// Whether the server answered the last liveness probe
    pub is_alive: bool,
    pub last_ping: Option<DateTime<Utc>>,
    /// Cached aggregate size of files in the current generation
    pub total_size: u64,
    /// Cached aggregate file count of the current generation
    pub total_files: u64,
    /// Completion time of the last successful crawl
    pub last_crawl: Option<DateTime<Utc>>,
    pub current_generation: Option<GenerationId>,
}

impl Server {
    /// Create a server with anonymous credentials and default settings
    pub fn new(host: impl Into<String>) -> Self {
        let id = host.into();
        Self {
            name: id.clone(),
            id,
            port: 21,
            login: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            encoding: TextEncoding::Latin1,
            force_utf8: true,
            ignored_names: None,
            is_alive: false,
            last_ping: None,
            total_size: 0,
            total_files: 0,
            last_crawl: None,
            current_generation: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = login.into();
        self.password = password.into();
        self
    }

    pub fn alive(mut self, is_alive: bool) -> Self {
        self.is_alive = is_alive;
        self
    }

    /// Remote URL of the server root
    pub fn url(&self) -> String {
        ftp_url(&self.id, self.port, "")
    }

    /// Settings and liveness fields, as written by registration
    ///
    /// Aggregates, crawl time and current generation are owned by the crawl
    /// pipeline and are not part of this record.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), self.id.clone());
        record.insert("name".into(), self.name.clone());
        record.insert("port".into(), self.port.to_string());
        record.insert("login".into(), self.login.clone());
        record.insert("password".into(), self.password.clone());
        record.insert("encoding".into(), self.encoding.to_string());
        record.insert("force_utf8".into(), self.force_utf8.to_string());
        if let Some(ignored) = &self.ignored_names {
            record.insert("ignored_names".into(), ignored.join(" "));
        }
        record.insert("is_alive".into(), self.is_alive.to_string());
        if let Some(last_ping) = self.last_ping {
            record.insert("last_ping".into(), last_ping.timestamp().to_string());
        }
        record
    }

    /// Rebuild a server from its record; `None` when the id is missing
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = record.get("id")?.clone();
        let defaults = Server::new(id.clone());
        Some(Self {
            name: record.get("name").cloned().unwrap_or(defaults.name),
            port: parse_field(record, "port").unwrap_or(defaults.port),
            login: record.get("login").cloned().unwrap_or(defaults.login),
            password: record.get("password").cloned().unwrap_or(defaults.password),
            encoding: parse_field(record, "encoding").unwrap_or(defaults.encoding),
            force_utf8: parse_field(record, "force_utf8").unwrap_or(defaults.force_utf8),
            ignored_names: record
                .get("ignored_names")
                .map(|names| names.split_whitespace().map(str::to_string).collect()),
            is_alive: parse_field(record, "is_alive").unwrap_or(false),
            last_ping: timestamp_field(record, "last_ping"),
            total_size: parse_field(record, "total_size").unwrap_or(0),
            total_files: parse_field(record, "total_files").unwrap_or(0),
            last_crawl: timestamp_field(record, "last_crawl"),
            current_generation: parse_field(record, "current_generation"),
            id,
        })
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Reference to one entry of one generation: `{server}|{generation}|{path}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryRef {
    pub server: ServerId,
    pub generation: GenerationId,
    pub path: String,
}

impl EntryRef {
    pub fn new(server: impl Into<String>, generation: GenerationId, path: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            generation,
            path: path.into(),
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.server, self.generation, self.path)
    }
}

impl FromStr for EntryRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(server), Some(generation), Some(path)) if !server.is_empty() => {
                let generation = generation
                    .parse()
                    .map_err(|e| format!("bad generation in entry ref '{}': {}", s, e))?;
                Ok(EntryRef::new(server, generation, path))
            }
            _ => Err(format!("malformed entry ref '{}'", s)),
        }
    }
}

/// One file or directory found during a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub server: ServerId,
    /// Absolute slash-separated path
    pub path: String,
    /// Last path component
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes, 0 for directories
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub generation: GenerationId,
}

impl Entry {
    pub fn entry_ref(&self) -> EntryRef {
        EntryRef::new(self.server.clone(), self.generation, self.path.clone())
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("server".into(), self.server.clone());
        record.insert("path".into(), self.path.clone());
        record.insert("name".into(), self.name.clone());
        record.insert("dir".into(), self.is_dir.to_string());
        record.insert("size".into(), self.size.to_string());
        if let Some(modified) = self.modified {
            record.insert("mtime".into(), modified.timestamp().to_string());
        }
        record.insert("generation".into(), self.generation.to_string());
        record
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            server: record.get("server")?.clone(),
            path: record.get("path")?.clone(),
            name: record.get("name")?.clone(),
            is_dir: parse_field(record, "dir").unwrap_or(false),
            size: parse_field(record, "size").unwrap_or(0),
            modified: timestamp_field(record, "mtime"),
            generation: parse_field(record, "generation")?,
        })
    }
}

/// Join a parent directory path and a basename into an absolute path
pub fn join_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Remote URL of a path on a server
pub fn ftp_url(host: &str, port: u16, path: &str) -> String {
    if port == 21 {
        format!("ftp://{}{}", host, path)
    } else {
        format!("ftp://{}:{}{}", host, port, path)
    }
}

// ============================================================================
// Search and catalog views
// ============================================================================

/// One row of a search result page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub server: ServerId,
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl SearchHit {
    pub fn url(&self) -> String {
        ftp_url(&self.server, 21, &self.path)
    }
}

impl From<Entry> for SearchHit {
    fn from(entry: Entry) -> Self {
        Self {
            server: entry.server,
            path: entry.path,
            name: entry.name,
            is_dir: entry.is_dir,
            size: entry.size,
            modified: entry.modified,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    /// Number of pages for the whole (filtered) candidate set
    pub page_count: usize,
    /// Size of the whole (filtered) candidate set
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Short server description for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub is_alive: bool,
    pub last_ping: Option<DateTime<Utc>>,
    pub total_files: u64,
    pub total_size: u64,
    pub last_crawl: Option<DateTime<Utc>>,
}

impl From<&Server> for ServerSummary {
    fn from(server: &Server) -> Self {
        Self {
            id: server.id.clone(),
            name: server.name.clone(),
            is_alive: server.is_alive,
            last_ping: server.last_ping,
            total_files: server.total_files,
            total_size: server.total_size,
            last_crawl: server.last_crawl,
        }
    }
}

/// Full server description
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerDetail {
    #[serde(flatten)]
    pub summary: ServerSummary,
    pub port: u16,
    pub login: String,
    pub encoding: TextEncoding,
    pub url: String,
    pub current_generation: Option<GenerationId>,
    /// Every tracked generation with its state
    pub generations: Vec<(GenerationId, GenerationState)>,
}

/// Aggregate numbers over the whole fleet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub servers: usize,
    pub online: usize,
    pub total_files: u64,
    pub total_size: u64,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_crawl: Option<DateTime<Utc>>,
}

// ============================================================================
// Record helpers
// ============================================================================

pub(crate) fn parse_field<T: FromStr>(record: &Record, field: &str) -> Option<T> {
    record.get(field).and_then(|value| value.parse().ok())
}

pub(crate) fn timestamp_field(record: &Record, field: &str) -> Option<DateTime<Utc>> {
    parse_field::<i64>(record, field).and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_ref_roundtrip_keeps_pipes_in_path() {
        let entry_ref = EntryRef::new("10.0.0.5", GenerationId(4), "/music/a|b.flac");
        let encoded = entry_ref.to_string();
        assert_eq!(encoded, "10.0.0.5|4|/music/a|b.flac");
        assert_eq!(encoded.parse::<EntryRef>().unwrap(), entry_ref);
    }

    #[test]
    fn test_entry_ref_rejects_garbage() {
        assert!("no-separators".parse::<EntryRef>().is_err());
        assert!("host|x|/path".parse::<EntryRef>().is_err());
        assert!("|1|/path".parse::<EntryRef>().is_err());
    }

    #[test]
    fn test_server_record_roundtrip() {
        let mut server = Server::new("192.168.0.5")
            .with_name("My FTP")
            .with_credentials("user", "secret")
            .alive(true);
        server.ignored_names = Some(vec![".".into(), "..".into(), ".svn".into()]);
        server.last_ping = Utc.timestamp_opt(1_289_484_078, 0).single();

        let restored = Server::from_record(&server.to_record()).unwrap();
        assert_eq!(restored, server);
    }

    #[test]
    fn test_entry_record_roundtrip() {
        let entry = Entry {
            server: "h".into(),
            path: "/animes/plop".into(),
            name: "plop".into(),
            is_dir: true,
            size: 0,
            modified: Utc.timestamp_opt(1_287_260_820, 0).single(),
            generation: GenerationId(6),
        };
        assert_eq!(Entry::from_record(&entry.to_record()).unwrap(), entry);
    }

    #[test]
    fn test_join_path_and_url() {
        assert_eq!(join_path("/", "pub"), "/pub");
        assert_eq!(join_path("/pub", "linux"), "/pub/linux");
        assert_eq!(ftp_url("h", 21, "/a"), "ftp://h/a");
        assert_eq!(ftp_url("h", 2121, "/a"), "ftp://h:2121/a");
    }
}
