//! KEEL - Store
//! Couples a value log, a key index log and the in-memory key directory
//! behind one reader/writer lock.
//!
//! ## Write path
//! - New key: append the value, then append an index entry.
//! - Existing key, value not larger: overwrite the value in place.
//! - Existing key, value larger: append the value and rewrite the key's
//!   index entry in place, so the index log does not grow.
//!
//! The directory is only touched after the disk writes succeeded.
//! Space left behind by relocated or deleted values is never reclaimed.
//!
//! ## Concurrency Model
//! - **Read operations** (`get`, `keys`, `count`, ...) acquire a **read lock** (shared)
//! - **Write operations** (`set`, `delete`, `counter`, ...) acquire a **write lock** (exclusive)
//!
//! The exclusive lock also serializes all disk writes of one store.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::index_log::{EntryKind, IndexEntry, IndexLog};
use super::keydir::{check_interval, DirectoryEntry, KeyDirectory, NotFound};
use super::metrics::EngineMetrics;
use super::value_log::{to_u32, ValueLog};
use crate::config::{create_dir_all, StoreMode, StoreOptions};
use crate::error::{KeelError, Result};
use crate::types::{Datum, Key, Value};

/// Path of the index log paired with the value log at `path`.
pub fn index_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".idx");
    PathBuf::from(name)
}

struct Files {
    values: ValueLog,
    index: IndexLog,
}

/// The unlocked state of a store. Reached through [`Store::read_with`]
/// and [`Store::write_with`], which hold the store's lock for the call.
pub struct StoreCore {
    name: PathBuf,
    mode: StoreMode,
    dir: KeyDirectory,
    files: Option<Files>,
    closed: bool,
    metrics: Arc<EngineMetrics>,
}

impl StoreCore {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(KeelError::DatabaseClosed);
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.dir.len()
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.dir.contains(key)
    }

    /// Current location of `key`, if present.
    pub fn location(&self, key: &[u8]) -> Option<DirectoryEntry> {
        self.dir.get(key).cloned()
    }

    pub fn get(&self, key: &[u8]) -> Result<Value> {
        let entry = match self.dir.get(key) {
            Some(entry) => entry,
            None => {
                self.metrics.record_get(None);
                return Err(KeelError::KeyNotFound);
            }
        };
        let value = match (&entry.value, &self.files) {
            (Some(value), _) => value.clone(),
            (None, Some(files)) => files.values.read(entry.seek, entry.size)?,
            (None, None) => return Err(KeelError::KeyNotFound),
        };
        self.metrics.record_get(Some(value.len()));
        Ok(value)
    }

    pub fn set(&mut self, key: Key, value: Value) -> Result<()> {
        let size = to_u32(value.len() as u64, "value size")?;
        let existing = self
            .dir
            .get(&key)
            .map(|e| (e.seek, e.size, e.key_seek));
        let key_len = key.len();

        let mut entry = match (&self.files, existing) {
            (None, _) => DirectoryEntry {
                size,
                ..Default::default()
            },
            (Some(files), None) => {
                let seek = files.values.write(&value, None)?;
                let key_seek = files.index.write(&IndexEntry::set(key.clone(), seek, size), None)?;
                DirectoryEntry {
                    seek,
                    size,
                    key_seek,
                    value: None,
                }
            }
            (Some(files), Some((old_seek, old_size, key_seek))) => {
                let seek = if size <= old_size {
                    files.values.write(&value, Some(old_seek as u64))?;
                    self.metrics.record_in_place();
                    old_seek
                } else {
                    let seek = files.values.write(&value, None)?;
                    self.metrics.record_relocation();
                    log::debug!(
                        "Relocated value of {} bytes from offset {} to {}",
                        size,
                        old_seek,
                        seek
                    );
                    seek
                };
                files
                    .index
                    .write(&IndexEntry::set(key.clone(), seek, size), Some(key_seek))?;
                DirectoryEntry {
                    seek,
                    size,
                    key_seek,
                    value: None,
                }
            }
        };

        self.metrics.record_set(key_len, value.len());
        if self.mode == StoreMode::Preload {
            entry.value = Some(value);
        }
        self.dir.upsert(key, entry);
        Ok(())
    }

    /// Remove `key`. Returns false when it was not present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        if !self.dir.contains(key) {
            return Ok(false);
        }
        if let Some(files) = &self.files {
            files.index.write(&IndexEntry::delete(key.to_vec()), None)?;
        }
        self.dir.remove(key);
        self.metrics.record_delete();
        Ok(true)
    }

    /// Ordered key listing. `from = None` starts at the first (ascending)
    /// or last (descending) key. A present `from` key is not returned itself;
    /// a missing one starts the scan where it would have been.
    pub fn keys(
        &self,
        from: Option<&[u8]>,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Vec<Key> {
        let (found, exclude_from) = match self.dir.find_key(from, ascending) {
            Ok(pos) => (pos, 1),
            Err(NotFound {
                boundary: Some(pos),
            }) => (pos, 0),
            Err(NotFound { boundary: None }) => return Vec::new(),
        };
        match check_interval(found, limit, offset, exclude_from, self.dir.len(), ascending) {
            Some((start, end)) => self.dir.window(start, end, ascending),
            None => Vec::new(),
        }
    }

    /// Keys starting with `prefix`, paged like [`StoreCore::keys`].
    pub fn keys_by_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Vec<Key> {
        let found = match self.dir.found_prefix(prefix, ascending) {
            Some(pos) => pos,
            None => return Vec::new(),
        };
        let (start, end) =
            match check_interval(found, limit, offset, 0, self.dir.len(), ascending) {
                Some(window) => window,
                None => return Vec::new(),
            };
        let keys = self.dir.keys();
        let indices: Box<dyn Iterator<Item = usize>> = if ascending {
            Box::new(start..=end)
        } else {
            Box::new((end..=start).rev())
        };
        indices
            .map(|i| &keys[i])
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Add `increment` to the 8-byte big-endian integer stored at `key`.
    /// A missing key counts from zero.
    pub fn counter(&mut self, key: Key, increment: i64) -> Result<i64> {
        let current = if self.dir.contains(&key) {
            let raw = self.get(&key)?;
            let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                KeelError::Serialization(format!(
                    "counter value has {} bytes, expected 8",
                    raw.len()
                ))
            })?;
            i64::from_be_bytes(bytes)
        } else {
            0
        };
        let next = current.wrapping_add(increment);
        self.set(key, next.to_be_bytes().to_vec())?;
        Ok(next)
    }

    /// Lengths of the value and index logs, `None` for memory-only stores.
    pub fn file_sizes(&self) -> Result<Option<(u64, u64)>> {
        match &self.files {
            Some(files) => Ok(Some((files.values.len()?, files.index.len()?))),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(files) = self.files.take() {
            files.values.sync()?;
            files.index.sync()?;
        }
        self.closed = true;
        self.dir = KeyDirectory::new();
        log::info!("Store {:?} closed", self.name);
        Ok(())
    }
}

/// A thread-safe key-value store over one value log and one index log.
///
/// ## Example
/// ```no_run
/// use keeldb::config::StoreOptions;
/// use keeldb::engine::store::Store;
///
/// let store = Store::open("data/users", &StoreOptions::default()).unwrap();
/// store.set("alice", "admin").unwrap();
/// assert_eq!(store.get("alice").unwrap(), b"admin".to_vec());
/// ```
pub struct Store {
    core: RwLock<StoreCore>,
    metrics: Arc<EngineMetrics>,
}

impl Store {
    /// Open or create the store at `name` (value log) and `name.idx`
    /// (index log), replaying the index log into memory.
    ///
    /// An empty name in [`StoreMode::Preload`] gives a memory-only store.
    pub fn open(name: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let name = name.as_ref().to_path_buf();
        let metrics = Arc::new(EngineMetrics::new());

        if name.as_os_str().is_empty() {
            if options.store_mode != StoreMode::Preload {
                return Err(KeelError::Config(
                    "a store without a name must use preload mode".into(),
                ));
            }
            return Ok(Self::in_memory());
        }

        if let Some(parent) = name.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent, options.dir_mode)?;
        }
        let values = ValueLog::open(name.clone(), options.file_mode, options.sync_writes)?;
        let index = IndexLog::open(index_path(&name), options.file_mode, options.sync_writes)?;

        let preload = options.store_mode == StoreMode::Preload;
        let mut dir = KeyDirectory::new();
        let replayed = index.replay(|entry, key_seek| {
            match entry.kind {
                EntryKind::Set => {
                    let value = if preload {
                        Some(values.read(entry.seek, entry.size)?)
                    } else {
                        None
                    };
                    dir.upsert_unsorted(
                        entry.key,
                        DirectoryEntry {
                            seek: entry.seek,
                            size: entry.size,
                            key_seek,
                            value,
                        },
                    );
                }
                EntryKind::Delete => {
                    dir.remove(&entry.key);
                }
            }
            Ok(())
        })?;
        dir.sort();
        metrics.record_replayed(replayed);

        log::info!(
            "Store opened at {:?} ({} index entries replayed, {} live keys)",
            name,
            replayed,
            dir.len()
        );

        Ok(Self::from_core(
            StoreCore {
                name,
                mode: options.store_mode,
                dir,
                files: Some(Files { values, index }),
                closed: false,
                metrics: metrics.clone(),
            },
            metrics,
        ))
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        Self::from_core(
            StoreCore {
                name: PathBuf::new(),
                mode: StoreMode::Preload,
                dir: KeyDirectory::new(),
                files: None,
                closed: false,
                metrics: metrics.clone(),
            },
            metrics,
        )
    }

    fn from_core(core: StoreCore, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            core: RwLock::new(core),
            metrics,
        }
    }

    /// Run `f` under the shared lock.
    pub fn read_with<R>(&self, f: impl FnOnce(&StoreCore) -> Result<R>) -> Result<R> {
        let core = self.core.read();
        core.ensure_open()?;
        f(&core)
    }

    /// Run `f` under the exclusive lock.
    pub fn write_with<R>(&self, f: impl FnOnce(&mut StoreCore) -> Result<R>) -> Result<R> {
        let mut core = self.core.write();
        core.ensure_open()?;
        f(&mut core)
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn set(&self, key: impl Into<Datum>, value: impl Into<Datum>) -> Result<()> {
        let key = key.into().into_key()?;
        let value = value.into().into_bytes();
        self.write_with(|core| core.set(key, value))
    }

    pub fn get(&self, key: impl Into<Datum>) -> Result<Value> {
        let key = key.into().into_key()?;
        self.read_with(|core| core.get(&key))
    }

    /// Read a value stored with [`Datum::blob`].
    pub fn get_blob<T: DeserializeOwned>(&self, key: impl Into<Datum>) -> Result<T> {
        let raw = self.get(key)?;
        Datum::decode_blob(&raw)
    }

    pub fn has(&self, key: impl Into<Datum>) -> Result<bool> {
        let key = key.into().into_key()?;
        self.read_with(|core| Ok(core.has(&key)))
    }

    /// Remove `key`. Returns false when it was not present.
    pub fn delete(&self, key: impl Into<Datum>) -> Result<bool> {
        let key = key.into().into_key()?;
        self.write_with(|core| core.delete(&key))
    }

    pub fn count(&self) -> Result<usize> {
        self.read_with(|core| Ok(core.count()))
    }

    /// Ordered key listing, see [`StoreCore::keys`]. A text or byte `from`
    /// ending in `*` lists by the prefix before the star instead.
    pub fn keys(
        &self,
        from: Option<Datum>,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Result<Vec<Key>> {
        let star_prefix = matches!(from, Some(Datum::Bytes(_)) | Some(Datum::Text(_)));
        let from = from.map(Datum::into_bytes);
        if let Some(prefix) = from.as_deref().and_then(|k| k.strip_suffix(b"*")) {
            if star_prefix {
                return self.read_with(|core| {
                    Ok(core.keys_by_prefix(prefix, limit, offset, ascending))
                });
            }
        }
        self.read_with(|core| Ok(core.keys(from.as_deref(), limit, offset, ascending)))
    }

    pub fn keys_by_prefix(
        &self,
        prefix: impl Into<Datum>,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Result<Vec<Key>> {
        let prefix = prefix.into().into_bytes();
        self.read_with(|core| Ok(core.keys_by_prefix(&prefix, limit, offset, ascending)))
    }

    /// Atomically add `increment` to an integer counter and return the new value.
    pub fn counter(&self, key: impl Into<Datum>, increment: i64) -> Result<i64> {
        let key = key.into().into_key()?;
        self.write_with(|core| core.counter(key, increment))
    }

    /// Write several pairs under one exclusive lock. Stops at the first failure;
    /// pairs written before it stay written.
    pub fn sets<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<Datum>,
        V: Into<Datum>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| Ok((k.into().into_key()?, v.into().into_bytes())))
            .collect::<Result<Vec<_>>>()?;
        self.write_with(|core| {
            for (key, value) in pairs {
                core.set(key, value)?;
            }
            Ok(())
        })
    }

    /// Read several keys under one shared lock. Missing keys are skipped.
    pub fn gets<K: Into<Datum>>(&self, keys: impl IntoIterator<Item = K>) -> Result<Vec<(Key, Value)>> {
        let keys = keys
            .into_iter()
            .map(|k| k.into().into_key())
            .collect::<Result<Vec<_>>>()?;
        self.read_with(|core| {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                match core.get(&key) {
                    Ok(value) => out.push((key, value)),
                    Err(KeelError::KeyNotFound) => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })
    }

    /// Current location of `key` in the logs.
    pub fn location(&self, key: impl Into<Datum>) -> Result<Option<DirectoryEntry>> {
        let key = key.into().into_key()?;
        self.read_with(|core| Ok(core.location(&key)))
    }

    /// Lengths of the value and index logs, `None` for memory-only stores.
    pub fn file_sizes(&self) -> Result<Option<(u64, u64)>> {
        self.read_with(|core| core.file_sizes())
    }

    /// Sync and release the files. Fails with `DatabaseClosed` when
    /// called twice; every later operation fails the same way.
    pub fn close(&self) -> Result<()> {
        self.core.write().close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.read().closed
    }
}
