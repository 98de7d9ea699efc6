//! Storage and server-default configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{Server, TextEncoding};

/// Keyspace storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file of the in-memory keyspace; nothing is persisted when unset
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: directories::ProjectDirs::from("", "", "ftpdex")
                .map(|d| d.data_dir().join("keyspace.json")),
        }
    }
}

/// Settings given to servers created from a positive liveness report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    pub port: u16,
    pub login: String,
    pub password: String,
    pub encoding: TextEncoding,
    pub force_utf8: bool,
}

impl ServerDefaults {
    /// Build a new server record for `host` from these defaults
    pub fn server(&self, host: &str) -> Server {
        let mut server = Server::new(host).with_credentials(&self.login, &self.password);
        server.port = self.port;
        server.encoding = self.encoding;
        server.force_utf8 = self.force_utf8;
        server
    }
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            port: 21,
            login: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            encoding: TextEncoding::Latin1,
            force_utf8: true,
        }
    }
}
