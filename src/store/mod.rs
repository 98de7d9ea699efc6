//! Keyspace storage substrate
//!
//! Every persistent record of the system (servers, generations, entries,
//! postings, cached result sets) lives in a keyspace made of three value
//! kinds: scalar strings, records (field maps) and sets of strings.
//!
//! Components never hold a global handle: they receive an `Arc<dyn Keyspace>`
//! at construction. Reads go through a [`ReadView`], which observes a single
//! consistent state of the keyspace for as long as it is held. Writes are
//! expressed as a [`WriteBatch`] and applied atomically, optionally after
//! inspecting the current state inside the same critical section
//! ([`Keyspace::transact`]).

pub mod keys;
mod memory;

pub use memory::MemoryKeyspace;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

/// A record stored under one key: field name to value
pub type Record = BTreeMap<String, String>;

/// Errors raised by a keyspace backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Set a scalar value
    Set { key: String, value: String },
    /// Merge fields into a record, creating it if needed
    SetFields { key: String, fields: Record },
    /// Add members to a set, creating it if needed
    Add { key: String, members: Vec<String> },
    /// Remove members from a set; the set disappears once empty
    Remove { key: String, members: Vec<String> },
    /// Delete a key of any kind
    Delete { key: String },
    /// Expire a key after the given duration
    Expire { key: String, ttl: Duration },
}

/// An ordered list of mutations applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn set_fields(&mut self, key: impl Into<String>, fields: Record) -> &mut Self {
        self.ops.push(WriteOp::SetFields {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn set_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl ToString,
    ) -> &mut Self {
        let mut fields = Record::new();
        fields.insert(field.into(), value.to_string());
        self.set_fields(key, fields)
    }

    pub fn add<I, S>(&mut self, key: impl Into<String>, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ops.push(WriteOp::Add {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn remove<I, S>(&mut self, key: impl Into<String>, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ops.push(WriteOp::Remove {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Append every operation of another batch
    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Ordering request for [`ReadView::sort`]
///
/// Patterns follow the `prefix*suffix->field` convention: `*` is replaced by
/// the member being sorted, and the optional `->field` part selects a field
/// of the record found at the resulting key. Without `->`, the scalar value
/// at the key is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    /// Pattern of the primary sort value; `None` sorts by the member itself
    pub by: Option<String>,
    /// Pattern of the tie-breaking value, always compared ascending and alphabetically
    pub tiebreak: Option<String>,
    /// Compare primary values as strings instead of numbers
    pub alpha: bool,
    /// Reverse the primary ordering
    pub descending: bool,
    /// Number of leading members to skip
    pub offset: usize,
    /// Maximum number of members to return
    pub limit: Option<usize>,
}

impl SortSpec {
    pub fn by(pattern: impl Into<String>) -> Self {
        Self {
            by: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn alpha(mut self, alpha: bool) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn tiebreak(mut self, pattern: impl Into<String>) -> Self {
        self.tiebreak = Some(pattern.into());
        self
    }

    pub fn window(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Consistent read access to the keyspace
///
/// Reads of a key holding another kind of value behave as if the key were
/// absent. Expired keys are never visible.
pub trait ReadView {
    /// Scalar value at `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Whole record at `key`
    fn record(&self, key: &str) -> Option<Record>;

    /// One field of the record at `key`
    fn field(&self, key: &str, field: &str) -> Option<String>;

    /// Whether any value is stored at `key`
    fn exists(&self, key: &str) -> bool;

    /// Members of the set at `key` (empty when absent)
    fn members(&self, key: &str) -> BTreeSet<String>;

    /// Whether `member` belongs to the set at `key`
    fn contains(&self, key: &str, member: &str) -> bool;

    /// Cardinality of the set at `key`
    fn cardinality(&self, key: &str) -> usize;

    /// Intersection of the sets at `keys`; empty when `keys` is empty
    fn intersect(&self, keys: &[String]) -> BTreeSet<String>;

    /// Members of the first set absent from all the others
    fn difference(&self, keys: &[String]) -> BTreeSet<String>;

    /// All live keys starting with `prefix`, in lexicographic order
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Order `members` by values looked up through `spec`, then apply its window
    fn sort(&self, members: &BTreeSet<String>, spec: &SortSpec) -> Vec<String>;
}

/// Transaction body: inspects the state and returns the mutations to apply
pub type TxBody<'a> = dyn FnMut(&dyn ReadView) -> Result<WriteBatch, StoreError> + 'a;

/// Keyspace backend shared by every component
pub trait Keyspace: Send + Sync {
    /// Open a consistent read view; writers wait until it is dropped
    fn view(&self) -> Result<Box<dyn ReadView + '_>, StoreError>;

    /// Run `body` against the current state and apply the batch it returns,
    /// with no other writer or reader interleaving
    fn transact(&self, body: &mut TxBody<'_>) -> Result<(), StoreError>;

    /// Apply a batch atomically
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut pending = Some(batch);
        self.transact(&mut |_| Ok(pending.take().unwrap_or_default()))
    }
}
