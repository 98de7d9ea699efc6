//! Key naming scheme
//!
//! | Key | Kind | Contents |
//! |---|---|---|
//! | `servers` | set | ids of every known server |
//! | `server:{id}` | record | server settings, liveness, aggregates, current generation |
//! | `generations:{id}` | set | generation ids known for a server |
//! | `generations:{id}:seq` | scalar | last allocated generation id |
//! | `generation:{id}:{gen}` | record | generation state and timestamps |
//! | `generation:{id}:{gen}:entries` | set | paths recorded in a generation |
//! | `entry:{ref}` | record | one crawled file or directory |
//! | `posting:{token}` | set | entry refs whose name contains the token |
//! | `results-epoch` | scalar | cache epoch, bumped on every invalidation |
//! | `results:{epoch}:{digest}` | set | cached candidate set of a query (expiring) |

use crate::types::{EntryRef, GenerationId};

pub const SERVERS: &str = "servers";
pub const ENTRY_PREFIX: &str = "entry:";
pub const POSTING_PREFIX: &str = "posting:";
pub const RESULTS_PREFIX: &str = "results:";
pub const RESULTS_EPOCH: &str = "results-epoch";

/// Sort pattern resolving an entry ref to its record
pub const ENTRY_PATTERN: &str = "entry:*";

pub fn server(id: &str) -> String {
    format!("server:{}", id)
}

pub fn generations(server: &str) -> String {
    format!("generations:{}", server)
}

pub fn generation_seq(server: &str) -> String {
    format!("generations:{}:seq", server)
}

pub fn generation(server: &str, generation: GenerationId) -> String {
    format!("generation:{}:{}", server, generation)
}

pub fn generation_entries(server: &str, generation: GenerationId) -> String {
    format!("generation:{}:{}:entries", server, generation)
}

pub fn entry(entry: &EntryRef) -> String {
    format!("{}{}", ENTRY_PREFIX, entry)
}

pub fn posting(token: &str) -> String {
    format!("{}{}", POSTING_PREFIX, token)
}

pub fn results(epoch: u64, digest: &str) -> String {
    format!("{}{}:{}", RESULTS_PREFIX, epoch, digest)
}

/// Pattern selecting one field of an entry record, for sorting
pub fn entry_field(field: &str) -> String {
    format!("{}->{}", ENTRY_PATTERN, field)
}
