use std::{
    cell::Cell,
    collections::{btree_map, BTreeMap},
    fs,
    io::Write,
    ops::Bound,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub type StateKey = String;

/// Pending writes of a single transaction, applied to the store on commit.
pub type WriteSet = BTreeMap<StateKey, Vec<u8>>;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("key must not be an empty string")]
    EmptyKey,
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is malformed: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file {path} has unsupported version {found}")]
    SnapshotVersion { path: PathBuf, found: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: StateKey,
    pub value: Vec<u8>,
}

/// Lazy cursor over a key range of the world state.
///
/// A cursor holds a resource of the store until it is closed. Dropping an open
/// cursor closes it, so early returns cannot leak it.
pub trait StateQueryIterator: Iterator<Item = Result<KeyValue, LedgerError>> {
    fn close(&mut self) -> Result<(), LedgerError>;
}

/// Key-value view of the world state handed to contract code.
pub trait WorldState {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), LedgerError>;

    /// Scans `[start, end)` in ascending key order. An empty bound is open.
    fn get_state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateQueryIterator + 'a>, LedgerError>;

    fn commit(&mut self, writes: WriteSet) -> Result<(), LedgerError> {
        for (key, value) in writes {
            self.put_state(&key, &value)?;
        }
        Ok(())
    }
}

fn check_key(key: &str) -> Result<(), LedgerError> {
    if key.is_empty() {
        return Err(LedgerError::EmptyKey);
    }
    Ok(())
}

struct RangeCursor<'a> {
    entries: Option<btree_map::Range<'a, StateKey, Vec<u8>>>,
    open_cursors: &'a Cell<usize>,
    closed: bool,
}

impl<'a> RangeCursor<'a> {
    fn open(
        map: &'a BTreeMap<StateKey, Vec<u8>>,
        start: &str,
        end: &str,
        open_cursors: &'a Cell<usize>,
    ) -> Self {
        let lower = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start)
        };
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };
        // BTreeMap::range panics on an inverted range
        let entries = if !start.is_empty() && !end.is_empty() && start > end {
            None
        } else {
            Some(map.range::<str, _>((lower, upper)))
        };
        open_cursors.set(open_cursors.get() + 1);
        Self {
            entries,
            open_cursors,
            closed: false,
        }
    }
}

impl Iterator for RangeCursor<'_> {
    type Item = Result<KeyValue, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        let (key, value) = self.entries.as_mut()?.next()?;
        Some(Ok(KeyValue {
            key: key.clone(),
            value: value.clone(),
        }))
    }
}

impl StateQueryIterator for RangeCursor<'_> {
    fn close(&mut self) -> Result<(), LedgerError> {
        if !self.closed {
            self.closed = true;
            self.entries = None;
            self.open_cursors.set(self.open_cursors.get() - 1);
        }
        Ok(())
    }
}

impl Drop for RangeCursor<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Ordered in-memory world state.
#[derive(Default)]
pub struct MemoryState {
    entries: BTreeMap<StateKey, Vec<u8>>,
    open_cursors: Cell<usize>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of range cursors handed out and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.get()
    }

    /// Writes raw bytes without key checks, for seeding fixtures and tests.
    pub fn insert_raw(&mut self, key: impl Into<StateKey>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }
}

impl WorldState for MemoryState {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        check_key(key)?;
        Ok(self.entries.get(key).cloned())
    }

    fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        check_key(key)?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateQueryIterator + 'a>, LedgerError> {
        Ok(Box::new(RangeCursor::open(
            &self.entries,
            start,
            end,
            &self.open_cursors,
        )))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredValue(#[serde(with = "crate::ledger::serde_bytes")] Vec<u8>);

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<StateKey, StoredValue>,
}

/// World state persisted as a JSON snapshot file.
///
/// Every commit rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new snapshot on disk.
pub struct FileState {
    path: PathBuf,
    inner: MemoryState,
}

impl FileState {
    /// Opens the snapshot at `path`, starting empty if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut inner = MemoryState::new();
        if path.exists() {
            let bytes = fs::read(&path).map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
            let snapshot: Snapshot =
                serde_json::from_slice(&bytes).map_err(|source| LedgerError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(LedgerError::SnapshotVersion {
                    path,
                    found: snapshot.version,
                });
            }
            for (key, StoredValue(value)) in snapshot.entries {
                inner.insert_raw(key, value);
            }
        }
        info!(path = %path.display(), keys = inner.len(), "opened world state");
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Writes `entries` to disk. The in-memory state is left untouched, so a
    /// failed write changes nothing.
    fn persist(&self, entries: &BTreeMap<StateKey, Vec<u8>>) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries
                .iter()
                .map(|(k, v)| (k.clone(), StoredValue(v.clone())))
                .collect(),
        };
        let bytes =
            serde_json::to_vec_pretty(&snapshot).map_err(|source| LedgerError::Snapshot {
                path: self.path.clone(),
                source,
            })?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).map_err(io_err)?;
        f.write_all(&bytes).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), keys = entries.len(), "persisted world state");
        Ok(())
    }
}

impl WorldState for FileState {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.inner.get_state(key)
    }

    fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        let mut writes = WriteSet::new();
        writes.insert(key.to_string(), value.to_vec());
        self.commit(writes)
    }

    fn get_state_by_range<'a>(
        &'a self,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateQueryIterator + 'a>, LedgerError> {
        self.inner.get_state_by_range(start, end)
    }

    fn commit(&mut self, writes: WriteSet) -> Result<(), LedgerError> {
        if writes.is_empty() {
            return Ok(());
        }
        for key in writes.keys() {
            check_key(key)?;
        }
        let mut next = self.inner.entries.clone();
        next.extend(writes);
        self.persist(&next)?;
        self.inner.entries = next;
        Ok(())
    }
}

/// Transaction-scoped view: reads hit committed state, writes are buffered.
///
/// Pending writes are not visible to reads of the same transaction.
pub struct TxSimulator<'a, S: WorldState + ?Sized> {
    committed: &'a S,
    writes: WriteSet,
}

impl<'a, S: WorldState + ?Sized> TxSimulator<'a, S> {
    pub fn new(committed: &'a S) -> Self {
        Self {
            committed,
            writes: WriteSet::new(),
        }
    }

    pub fn into_write_set(self) -> WriteSet {
        self.writes
    }
}

impl<S: WorldState + ?Sized> WorldState for TxSimulator<'_, S> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.committed.get_state(key)
    }

    fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        check_key(key)?;
        self.writes.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_state_by_range<'b>(
        &'b self,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateQueryIterator + 'b>, LedgerError> {
        self.committed.get_state_by_range(start, end)
    }
}

pub(crate) mod serde_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}
