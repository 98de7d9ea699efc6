//! In-memory keyspace backend with optional JSON snapshot persistence

use super::{Keyspace, ReadView, Record, SortSpec, StoreError, TxBody, WriteBatch, WriteOp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
enum Value {
    Scalar(String),
    Record(Record),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Record(_) => "record",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    values: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    values: BTreeMap<String, Value>,
    deadlines: HashMap<String, Instant>,
}

impl State {
    fn is_expired(&self, key: &str, now: Instant) -> bool {
        self.deadlines
            .get(key)
            .map(|deadline| *deadline <= now)
            .unwrap_or(false)
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Value> {
        if self.is_expired(key, now) {
            return None;
        }
        self.values.get(key)
    }

    fn drop_if_expired(&mut self, key: &str, now: Instant) {
        if self.is_expired(key, now) {
            self.values.remove(key);
            self.deadlines.remove(key);
        }
    }

    fn apply(&mut self, batch: WriteBatch, now: Instant) -> Result<(), StoreError> {
        let mut undo: HashMap<String, (Option<Value>, Option<Instant>)> = HashMap::new();

        for op in batch.into_ops() {
            let key = op_key(&op).to_string();
            self.drop_if_expired(&key, now);
            undo.entry(key.clone()).or_insert_with(|| {
                (
                    self.values.get(&key).cloned(),
                    self.deadlines.get(&key).copied(),
                )
            });

            if let Err(e) = self.apply_op(op, now) {
                for (key, (value, deadline)) in undo {
                    match value {
                        Some(value) => self.values.insert(key.clone(), value),
                        None => self.values.remove(&key),
                    };
                    match deadline {
                        Some(deadline) => self.deadlines.insert(key, deadline),
                        None => self.deadlines.remove(&key),
                    };
                }
                return Err(e);
            }
        }

        Ok(())
    }

    fn apply_op(&mut self, op: WriteOp, now: Instant) -> Result<(), StoreError> {
        match op {
            WriteOp::Set { key, value } => {
                self.deadlines.remove(&key);
                self.values.insert(key, Value::Scalar(value));
            }
            WriteOp::SetFields { key, fields } => match self.values.get_mut(&key) {
                Some(Value::Record(record)) => record.extend(fields),
                Some(other) => return Err(wrong_type(&key, other)),
                None => {
                    self.values.insert(key, Value::Record(fields));
                }
            },
            WriteOp::Add { key, members } => match self.values.get_mut(&key) {
                Some(Value::Set(set)) => set.extend(members),
                Some(other) => return Err(wrong_type(&key, other)),
                None => {
                    if !members.is_empty() {
                        self.values
                            .insert(key, Value::Set(members.into_iter().collect()));
                    }
                }
            },
            WriteOp::Remove { key, members } => {
                let now_empty = match self.values.get_mut(&key) {
                    Some(Value::Set(set)) => {
                        for member in &members {
                            set.remove(member);
                        }
                        set.is_empty()
                    }
                    Some(other) => return Err(wrong_type(&key, other)),
                    None => false,
                };
                if now_empty {
                    self.values.remove(&key);
                    self.deadlines.remove(&key);
                }
            }
            WriteOp::Delete { key } => {
                self.values.remove(&key);
                self.deadlines.remove(&key);
            }
            WriteOp::Expire { key, ttl } => {
                if self.values.contains_key(&key) {
                    self.deadlines.insert(key, now + ttl);
                }
            }
        }
        Ok(())
    }
}

fn op_key(op: &WriteOp) -> &str {
    match op {
        WriteOp::Set { key, .. }
        | WriteOp::SetFields { key, .. }
        | WriteOp::Add { key, .. }
        | WriteOp::Remove { key, .. }
        | WriteOp::Delete { key }
        | WriteOp::Expire { key, .. } => key,
    }
}

fn wrong_type(key: &str, value: &Value) -> StoreError {
    StoreError::WrongType(format!("{} holds a {}", key, value.kind()))
}

/// Read view over a borrowed or guarded state
struct MemoryView<G: Deref<Target = State>> {
    state: G,
    now: Instant,
}

impl<G: Deref<Target = State>> MemoryView<G> {
    fn set(&self, key: &str) -> Option<&BTreeSet<String>> {
        match self.state.live(key, self.now) {
            Some(Value::Set(set)) => Some(set),
            _ => None,
        }
    }

    fn lookup(&self, pattern: &str, member: &str) -> Option<String> {
        let (key_pattern, field) = match pattern.split_once("->") {
            Some((key_pattern, field)) => (key_pattern, Some(field)),
            None => (pattern, None),
        };
        let key = key_pattern.replacen('*', member, 1);
        match field {
            Some(field) => self.field(&key, field),
            None => self.get(&key),
        }
    }
}

impl<G: Deref<Target = State>> ReadView for MemoryView<G> {
    fn get(&self, key: &str) -> Option<String> {
        match self.state.live(key, self.now) {
            Some(Value::Scalar(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn record(&self, key: &str) -> Option<Record> {
        match self.state.live(key, self.now) {
            Some(Value::Record(record)) => Some(record.clone()),
            _ => None,
        }
    }

    fn field(&self, key: &str, field: &str) -> Option<String> {
        match self.state.live(key, self.now) {
            Some(Value::Record(record)) => record.get(field).cloned(),
            _ => None,
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.state.live(key, self.now).is_some()
    }

    fn members(&self, key: &str) -> BTreeSet<String> {
        self.set(key).cloned().unwrap_or_default()
    }

    fn contains(&self, key: &str, member: &str) -> bool {
        self.set(key).map(|set| set.contains(member)).unwrap_or(false)
    }

    fn cardinality(&self, key: &str) -> usize {
        self.set(key).map(BTreeSet::len).unwrap_or(0)
    }

    fn intersect(&self, keys: &[String]) -> BTreeSet<String> {
        let mut sets: Vec<&BTreeSet<String>> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.set(key) {
                Some(set) => sets.push(set),
                None => return BTreeSet::new(),
            }
        }
        // Walk the smallest set and probe the others
        sets.sort_by_key(|set| set.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return BTreeSet::new();
        };
        smallest
            .iter()
            .filter(|member| rest.iter().all(|set| set.contains(*member)))
            .cloned()
            .collect()
    }

    fn difference(&self, keys: &[String]) -> BTreeSet<String> {
        let Some((first, rest)) = keys.split_first() else {
            return BTreeSet::new();
        };
        let others: Vec<&BTreeSet<String>> = rest.iter().filter_map(|k| self.set(k)).collect();
        self.members(first)
            .into_iter()
            .filter(|member| !others.iter().any(|set| set.contains(member)))
            .collect()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .values
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !self.state.is_expired(key, self.now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn sort(&self, members: &BTreeSet<String>, spec: &SortSpec) -> Vec<String> {
        let mut rows: Vec<(&String, Option<String>, Option<String>)> = members
            .iter()
            .map(|member| {
                let primary = spec.by.as_deref().map(|p| self.lookup(p, member));
                let tie = spec.tiebreak.as_deref().and_then(|p| self.lookup(p, member));
                (member, primary.unwrap_or_else(|| Some(member.clone())), tie)
            })
            .collect();

        rows.sort_by(|a, b| {
            let primary = compare_values(a.1.as_deref(), b.1.as_deref(), spec.alpha);
            let primary = if spec.descending {
                primary.reverse()
            } else {
                primary
            };
            primary
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.0.cmp(b.0))
        });

        let rows = rows.into_iter().skip(spec.offset).map(|(m, _, _)| m.clone());
        match spec.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

fn compare_values(a: Option<&str>, b: Option<&str>, alpha: bool) -> Ordering {
    if alpha {
        return a.unwrap_or_default().cmp(b.unwrap_or_default());
    }
    let parse = |v: Option<&str>| v.and_then(|s| s.trim().parse::<f64>().ok()).unwrap_or(0.0);
    parse(a).total_cmp(&parse(b))
}

/// Keyspace held in process memory behind a single reader/writer lock
///
/// Views hold the read side of the lock, so a view observes one state for
/// its whole lifetime and transactions are serialized against every reader.
pub struct MemoryKeyspace {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryKeyspace {
    /// Create an empty, purely in-memory keyspace
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            snapshot_path: None,
        }
    }

    /// Open a keyspace backed by a snapshot file, loading it when present
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut state = State::default();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::Aborted(format!(
                    "unsupported snapshot version {} in {}",
                    snapshot.version,
                    path.display()
                )));
            }
            state.values = snapshot.values;
            info!("Loaded keyspace snapshot with {} keys from {}", state.values.len(), path.display());
        } else {
            debug!("No keyspace snapshot at {}, starting empty", path.display());
        }

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Write the snapshot file, skipping keys that carry an expiry
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = {
            let state = self.state.read();
            Snapshot {
                version: SNAPSHOT_VERSION,
                values: state
                    .values
                    .iter()
                    .filter(|(key, _)| !state.deadlines.contains_key(*key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string(&snapshot)?)?;
        std::fs::rename(&tmp_path, path)?;

        info!("Saved keyspace snapshot with {} keys", snapshot.values.len());
        Ok(())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let state = self.state.read();
        let now = Instant::now();
        state
            .values
            .keys()
            .filter(|key| !state.is_expired(key, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace for MemoryKeyspace {
    fn view(&self) -> Result<Box<dyn ReadView + '_>, StoreError> {
        Ok(Box::new(MemoryView {
            state: self.state.read(),
            now: Instant::now(),
        }))
    }

    fn transact(&self, body: &mut TxBody<'_>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let now = Instant::now();
        let batch = {
            let view = MemoryView {
                state: &*state,
                now,
            };
            body(&view)?
        };
        state.apply(batch, now)
    }
}
