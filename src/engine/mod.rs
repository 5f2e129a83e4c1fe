//! KEEL - Storage Engine Module
//! Top-level module for the storage engine components and the `Keel`
//! composition root that ties them together.

pub mod collections;
pub mod index_log;
pub mod journal;
pub mod keydir;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod ttl;
pub mod value_log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{KeelError, Result};
use crate::types::{unix_secs, CollectionType, Datum, Key, Value};

use self::collections::{HashStore, SetStore, StringStore, TypedCollection};
use self::journal::Journal;
use self::metrics::EngineMetrics;
use self::record::{Mutation, Record};
use self::store::Store;
use self::sweeper::Sweeper;
use self::ttl::TtlRegistry;

/// File name of the typed-mutation journal inside the data directory.
pub const JOURNAL_FILE: &str = "journal.log";
/// Store name of the string collection inside the data directory.
pub const STRINGS_STORE: &str = "strings";

/// The Keel storage engine.
/// Owns the string, hash and set collections, the shared TTL registry,
/// the mutation journal and one background sweeper per collection.
///
/// Every method takes `&self`; share the engine across threads with `Arc`.
pub struct Keel {
    config: Config,
    ttl: Arc<TtlRegistry>,
    strings: Arc<StringStore>,
    hashes: Arc<HashStore>,
    sets: Arc<SetStore>,
    journal: Option<Arc<Journal>>,
    sweepers: Mutex<Vec<Sweeper>>,
    closed: AtomicBool,
    metrics: Arc<EngineMetrics>,
}

impl Keel {
    /// Open or create an engine at the configured path.
    /// Replays the string store's index log and the journal, then starts
    /// the sweepers unless the eviction interval is zero.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (store, journal) = if config.persist {
            config.ensure_dirs()?;
            let store = Store::open(config.data_dir.join(STRINGS_STORE), &config.store_options())?;
            let journal = Journal::open(
                config.data_dir.join(JOURNAL_FILE),
                config.file_mode,
                config.sync_writes,
            )?;
            (store, Some(Arc::new(journal)))
        } else {
            (Store::in_memory(), None)
        };
        let metrics = store.metrics().clone();

        let ttl = Arc::new(TtlRegistry::new());
        let strings = Arc::new(StringStore::new(store, journal.clone()));
        let hashes = Arc::new(HashStore::new(journal.clone()));
        let sets = Arc::new(SetStore::new(journal.clone()));

        if let Some(journal) = &journal {
            let records = journal.recover()?;
            let count = records.len();
            replay(records, &hashes, &sets, &ttl)?;
            metrics.record_replayed(count);
            log::info!(
                "Journal {:?} replayed ({} records, {} TTLs)",
                journal.path(),
                count,
                ttl.len()
            );
        }

        let engine = Self {
            config,
            ttl,
            strings,
            hashes,
            sets,
            journal,
            sweepers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            metrics,
        };
        engine.start_sweepers()?;

        log::info!(
            "Keel engine opened at {:?} (persist: {}, eviction interval: {:?})",
            engine.config.data_dir,
            engine.config.persist,
            engine.config.eviction_interval
        );
        Ok(engine)
    }

    fn start_sweepers(&self) -> Result<()> {
        let interval = self.config.eviction_interval;
        if interval.is_zero() {
            return Ok(());
        }
        let mut sweepers = self.sweepers.lock();
        for collection in self.collections() {
            sweepers.push(Sweeper::spawn(
                collection,
                self.ttl.clone(),
                self.metrics.clone(),
                interval,
            )?);
        }
        Ok(())
    }

    fn collections(&self) -> [Arc<dyn TypedCollection>; 3] {
        let strings: Arc<dyn TypedCollection> = self.strings.clone();
        let hashes: Arc<dyn TypedCollection> = self.hashes.clone();
        let sets: Arc<dyn TypedCollection> = self.sets.clone();
        [strings, hashes, sets]
    }

    fn collection(&self, kind: CollectionType) -> &dyn TypedCollection {
        match kind {
            CollectionType::String => &*self.strings,
            CollectionType::Hash => &*self.hashes,
            CollectionType::Set => &*self.sets,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KeelError::DatabaseClosed);
        }
        Ok(())
    }

    /// Lazy expiry check run before every read.
    fn check_expired(&self, kind: CollectionType, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.ttl.has_expired(kind, key) && self.collection(kind).evict(key, &self.ttl)? {
            self.metrics.record_lazy_eviction();
            log::debug!("Lazily evicted expired {} key", kind);
            return Err(KeelError::ExpiredKey);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    // ---- strings ----

    /// Write a string. Any TTL the key had is dropped.
    pub fn set(&self, key: impl Into<Datum>, value: impl Into<Datum>) -> Result<()> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::String, &key)
            .or_else(ignore_expired)?;
        self.strings.set(key, value.into().into_bytes(), &self.ttl)
    }

    pub fn get(&self, key: impl Into<Datum>) -> Result<Value> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::String, &key)?;
        self.strings.get(&key)
    }

    /// Remove a string and its TTL. Returns false when it was not present.
    pub fn delete(&self, key: impl Into<Datum>) -> Result<bool> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        self.strings.delete(&key, &self.ttl)
    }

    /// Ordered string keys; see [`Store::keys`].
    pub fn keys(
        &self,
        from: Option<Datum>,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Result<Vec<Key>> {
        self.ensure_open()?;
        self.strings.store().keys(from, limit, offset, ascending)
    }

    pub fn keys_by_prefix(
        &self,
        prefix: impl Into<Datum>,
        limit: usize,
        offset: usize,
        ascending: bool,
    ) -> Result<Vec<Key>> {
        self.ensure_open()?;
        self.strings
            .store()
            .keys_by_prefix(prefix, limit, offset, ascending)
    }

    // ---- hashes ----

    /// Set a hash field. Returns true when the field is new.
    pub fn hset(
        &self,
        key: impl Into<Datum>,
        field: impl Into<Datum>,
        value: impl Into<Datum>,
    ) -> Result<bool> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Hash, &key)
            .or_else(ignore_expired)?;
        self.hashes
            .hset(key, field.into().into_bytes(), value.into().into_bytes())
    }

    pub fn hget(&self, key: impl Into<Datum>, field: impl Into<Datum>) -> Result<Value> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Hash, &key)?;
        self.hashes.hget(&key, &field.into().into_bytes())
    }

    pub fn hgetall(&self, key: impl Into<Datum>) -> Result<Vec<(Vec<u8>, Value)>> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Hash, &key)?;
        self.hashes.hgetall(&key)
    }

    pub fn hdel(&self, key: impl Into<Datum>, field: impl Into<Datum>) -> Result<bool> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Hash, &key)?;
        self.hashes.hdel(&key, &field.into().into_bytes(), &self.ttl)
    }

    pub fn hclear(&self, key: impl Into<Datum>) -> Result<bool> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        self.hashes.hclear(&key, &self.ttl)
    }

    // ---- sets ----

    /// Add members to a set. Returns how many were new.
    pub fn sadd<M: Into<Datum>>(
        &self,
        key: impl Into<Datum>,
        members: impl IntoIterator<Item = M>,
    ) -> Result<usize> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Set, &key)
            .or_else(ignore_expired)?;
        let members = members.into_iter().map(|m| m.into().into_bytes()).collect();
        self.sets.sadd(key, members)
    }

    pub fn srem(&self, key: impl Into<Datum>, member: impl Into<Datum>) -> Result<bool> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Set, &key)?;
        self.sets.srem(&key, &member.into().into_bytes(), &self.ttl)
    }

    /// Move a member between sets. Returns false when `src` does not hold it.
    pub fn smove(
        &self,
        src: impl Into<Datum>,
        dst: impl Into<Datum>,
        member: impl Into<Datum>,
    ) -> Result<bool> {
        let src = src.into().into_key()?;
        let dst = dst.into().into_key()?;
        self.check_expired(CollectionType::Set, &src)?;
        self.check_expired(CollectionType::Set, &dst)
            .or_else(ignore_expired)?;
        self.sets.smove(&src, dst, member.into().into_bytes(), &self.ttl)
    }

    pub fn smembers(&self, key: impl Into<Datum>) -> Result<Vec<Vec<u8>>> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Set, &key)?;
        self.sets.smembers(&key)
    }

    pub fn sismember(&self, key: impl Into<Datum>, member: impl Into<Datum>) -> Result<bool> {
        let key = key.into().into_key()?;
        self.check_expired(CollectionType::Set, &key)?;
        Ok(self.sets.sismember(&key, &member.into().into_bytes()))
    }

    pub fn sclear(&self, key: impl Into<Datum>) -> Result<bool> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        self.sets.sclear(&key, &self.ttl)
    }

    // ---- expiry ----

    /// Expire `key` of collection `kind` after `secs` seconds.
    pub fn expire(&self, kind: CollectionType, key: impl Into<Datum>, secs: i64) -> Result<()> {
        self.expire_at(kind, key, unix_secs().saturating_add(secs))
    }

    /// Expire `key` at an absolute Unix timestamp in seconds.
    /// Fails with `InvalidKey` when the collection does not hold the key.
    pub fn expire_at(&self, kind: CollectionType, key: impl Into<Datum>, deadline: i64) -> Result<()> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        self.collection(kind).expire_at(&key, deadline, &self.ttl)
    }

    /// Seconds left before `key` expires, `None` when it has no TTL.
    pub fn ttl(&self, kind: CollectionType, key: impl Into<Datum>) -> Result<Option<i64>> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        Ok(self.ttl.remaining(kind, &key))
    }

    /// Evict `key` now if it has expired. Returns true when it was removed.
    pub fn evict(&self, kind: CollectionType, key: impl Into<Datum>) -> Result<bool> {
        self.ensure_open()?;
        let key = key.into().into_key()?;
        let removed = self.collection(kind).evict(&key, &self.ttl)?;
        if removed {
            self.metrics.record_lazy_eviction();
        }
        Ok(removed)
    }

    /// Sweep every collection once. Returns the number of keys removed.
    pub fn sweep_all(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        for collection in self.collections() {
            removed += collection.sweep(&self.ttl)?;
        }
        self.metrics.record_swept(removed);
        Ok(removed)
    }

    // ---- lifecycle ----

    /// Stop the sweepers, close the string store and sync the journal.
    /// A second call fails with `DatabaseClosed`, as does every later operation.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(KeelError::DatabaseClosed);
        }
        for mut sweeper in self.sweepers.lock().drain(..) {
            sweeper.stop();
        }
        self.strings.close()?;
        if let Some(journal) = &self.journal {
            journal.sync()?;
        }
        log::info!("Keel engine closed at {:?}", self.config.data_dir);
        log::debug!("{}", self.metrics.report());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Writes to an expired key start over on a fresh, empty one.
fn ignore_expired(err: KeelError) -> Result<()> {
    match err {
        KeelError::ExpiredKey => Ok(()),
        e => Err(e),
    }
}

/// Rebuild hashes, sets and TTLs from journal records, oldest first.
fn replay(records: Vec<Record>, hashes: &HashStore, sets: &SetStore, ttl: &TtlRegistry) -> Result<()> {
    for record in records {
        let mutation = match record.mutation() {
            Some(mutation) => mutation,
            None => {
                log::warn!("Skipping journal record with unknown state {:#06x}", record.state);
                continue;
            }
        };
        let kind = mutation.collection_type();
        if mutation.is_expire() {
            ttl.set_ttl(kind, record.key, record.timestamp as i64);
            continue;
        }
        let present = match mutation {
            Mutation::StringSet => continue,
            Mutation::StringRem => false,
            _ if kind == CollectionType::Hash => {
                hashes.apply(&record)?;
                hashes.contains(&record.key)?
            }
            _ => {
                sets.apply(&record)?;
                sets.contains(&record.key)?
            }
        };
        if !present {
            ttl.remove(kind, &record.key);
        }
    }
    Ok(())
}
