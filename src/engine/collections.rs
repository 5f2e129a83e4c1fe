//! KEEL - Typed Collections
//! String, hash and set collections. Each owns its data behind its own
//! reader/writer lock and exposes the same eviction contract to the sweepers.
//!
//! ## Durability
//! With a journal attached, every mutation is appended to it before the
//! in-memory state changes; a failed append leaves the collection untouched.
//! Strings keep their values in a [`Store`]; for them the journal only
//! carries TTLs and removals.
//!
//! ## Lock ordering
//! Collection lock first, then the TTL registry (which has its own lock).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::RwLock;

use super::journal::Journal;
use super::record::{Mutation, Record};
use super::store::Store;
use super::ttl::TtlRegistry;
use crate::error::{KeelError, Result};
use crate::types::{unix_secs, CollectionType, Key, Value};

/// The contract every typed collection offers to the engine and the sweepers.
pub trait TypedCollection: Send + Sync {
    fn collection_type(&self) -> CollectionType;

    /// Every key currently held.
    fn keys(&self) -> Result<Vec<Key>>;

    fn contains(&self, key: &[u8]) -> Result<bool>;

    /// Give `key` an absolute expiry deadline. Fails with `InvalidKey`
    /// when the key is not held.
    fn expire_at(&self, key: &[u8], deadline: i64, ttl: &TtlRegistry) -> Result<()>;

    /// Lazy eviction of one key. Returns true when the key was expired and
    /// removed; a key already gone is a no-op.
    fn evict(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool>;

    /// Remove every expired key. Returns how many were removed.
    fn sweep(&self, ttl: &TtlRegistry) -> Result<usize>;
}

fn append(journal: &Option<Arc<Journal>>, record: Record) -> Result<()> {
    match journal {
        Some(journal) => journal.append(&record),
        None => Ok(()),
    }
}

/// Pack two byte strings into one journal value: `[len(a): 4][a][b]`.
pub(crate) fn pack_pair(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + a.len() + b.len());
    buf.put_u32(a.len() as u32);
    buf.put_slice(a);
    buf.put_slice(b);
    buf
}

pub(crate) fn unpack_pair(mut buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if buf.len() < 4 {
        return Err(KeelError::Corruption("journal pair too short".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.len() < len {
        return Err(KeelError::Corruption("journal pair length out of range".into()));
    }
    Ok((buf[..len].to_vec(), buf[len..].to_vec()))
}

/// Run `mutate` after a clear record for `key` was journaled. When it fails
/// the key keeps its TTL, so the deadline is journaled again to keep replay
/// from dropping it.
fn or_restore_ttl(
    kind: CollectionType,
    key: &[u8],
    ttl: &TtlRegistry,
    journal: &Option<Arc<Journal>>,
    mutate: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let result = mutate();
    if result.is_err() {
        if let Some(deadline) = ttl.get_ttl(kind, key) {
            if let Err(e) = append(journal, Record::with_expire(key.to_vec(), deadline, kind)) {
                log::error!("Failed to journal restored {} TTL: {}", kind, e);
            }
        }
    }
    result
}

/// Lazy eviction shared by all collections. Runs with the collection's
/// exclusive lock held.
fn evict_one(
    kind: CollectionType,
    key: &[u8],
    present: bool,
    ttl: &TtlRegistry,
    journal: &Option<Arc<Journal>>,
    remove: impl FnOnce() -> Result<()>,
) -> Result<bool> {
    if !ttl.has_expired(kind, key) {
        return Ok(false);
    }
    if present {
        append(journal, Record::new(key.to_vec(), Mutation::clear_for(kind)))?;
        or_restore_ttl(kind, key, ttl, journal, remove)?;
    }
    ttl.remove(kind, key);
    Ok(present)
}

/// Sweep shared by all collections. Runs with the collection's exclusive
/// lock held, over the keys it holds.
fn sweep_keys(
    kind: CollectionType,
    keys: Vec<Key>,
    ttl: &TtlRegistry,
    journal: &Option<Arc<Journal>>,
    mut remove: impl FnMut(&[u8]) -> Result<()>,
) -> Result<usize> {
    let now = unix_secs();
    let expired: Vec<Key> = keys
        .into_iter()
        .filter(|k| ttl.has_expired_at(kind, k, now))
        .collect();
    for key in &expired {
        append(journal, Record::new(key.clone(), Mutation::clear_for(kind)))?;
        or_restore_ttl(kind, key, ttl, journal, || remove(key))?;
        ttl.remove(kind, key);
    }
    Ok(expired.len())
}

fn set_deadline(
    kind: CollectionType,
    key: &[u8],
    deadline: i64,
    ttl: &TtlRegistry,
    journal: &Option<Arc<Journal>>,
) -> Result<()> {
    append(journal, Record::with_expire(key.to_vec(), deadline, kind))?;
    ttl.set_ttl(kind, key.to_vec(), deadline);
    Ok(())
}

/// String values, kept in a [`Store`].
pub struct StringStore {
    store: Store,
    journal: Option<Arc<Journal>>,
}

impl StringStore {
    pub fn new(store: Store, journal: Option<Arc<Journal>>) -> Self {
        Self { store, journal }
    }

    /// The backing store, for range and prefix queries.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn get(&self, key: &[u8]) -> Result<Value> {
        self.store.read_with(|core| core.get(key))
    }

    /// Write a value. The written value starts without a TTL.
    pub fn set(&self, key: Key, value: Value, ttl: &TtlRegistry) -> Result<()> {
        let kind = CollectionType::String;
        self.store.write_with(|core| {
            if ttl.get_ttl(kind, &key).is_none() {
                return core.set(key, value);
            }
            append(&self.journal, Record::new(key.clone(), Mutation::StringRem))?;
            or_restore_ttl(kind, &key, ttl, &self.journal, || core.set(key.clone(), value))?;
            ttl.remove(kind, &key);
            Ok(())
        })
    }

    /// Remove `key` and its TTL. Returns false when it was not present.
    pub fn delete(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        self.store.write_with(|core| {
            if !core.has(key) {
                return Ok(false);
            }
            let kind = CollectionType::String;
            append(&self.journal, Record::new(key.to_vec(), Mutation::StringRem))?;
            or_restore_ttl(kind, key, ttl, &self.journal, || core.delete(key).map(|_| ()))?;
            ttl.remove(kind, key);
            Ok(true)
        })
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

impl TypedCollection for StringStore {
    fn collection_type(&self) -> CollectionType {
        CollectionType::String
    }

    fn keys(&self) -> Result<Vec<Key>> {
        self.store.read_with(|core| Ok(core.keys(None, 0, 0, true)))
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        self.store.read_with(|core| Ok(core.has(key)))
    }

    fn expire_at(&self, key: &[u8], deadline: i64, ttl: &TtlRegistry) -> Result<()> {
        self.store.write_with(|core| {
            if !core.has(key) {
                return Err(KeelError::InvalidKey);
            }
            set_deadline(CollectionType::String, key, deadline, ttl, &self.journal)
        })
    }

    fn evict(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        self.store.write_with(|core| {
            let present = core.has(key);
            evict_one(CollectionType::String, key, present, ttl, &self.journal, || {
                core.delete(key).map(|_| ())
            })
        })
    }

    fn sweep(&self, ttl: &TtlRegistry) -> Result<usize> {
        self.store.write_with(|core| {
            let keys = core.keys(None, 0, 0, true);
            sweep_keys(CollectionType::String, keys, ttl, &self.journal, |key| {
                core.delete(key).map(|_| ())
            })
        })
    }
}

type Fields = HashMap<Vec<u8>, Value>;

/// Hashes: a key maps to a set of field/value pairs.
#[derive(Default)]
pub struct HashStore {
    data: RwLock<HashMap<Key, Fields>>,
    journal: Option<Arc<Journal>>,
}

impl HashStore {
    pub fn new(journal: Option<Arc<Journal>>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Set a field. Returns true when the field is new.
    pub fn hset(&self, key: Key, field: Vec<u8>, value: Value) -> Result<bool> {
        let mut data = self.data.write();
        append(
            &self.journal,
            Record::with_value(key.clone(), pack_pair(&field, &value), Mutation::HashSet),
        )?;
        Ok(data.entry(key).or_default().insert(field, value).is_none())
    }

    /// Read a field. `InvalidKey` when the hash does not exist,
    /// `KeyNotFound` when the field does not.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Value> {
        let data = self.data.read();
        let fields = data.get(key).ok_or(KeelError::InvalidKey)?;
        fields.get(field).cloned().ok_or(KeelError::KeyNotFound)
    }

    /// All fields, sorted by field name.
    pub fn hgetall(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Value)>> {
        let data = self.data.read();
        let fields = data.get(key).ok_or(KeelError::InvalidKey)?;
        let mut pairs: Vec<_> = fields.iter().map(|(f, v)| (f.clone(), v.clone())).collect();
        pairs.sort();
        Ok(pairs)
    }

    /// Remove a field. Removing the last field removes the hash and its TTL.
    pub fn hdel(&self, key: &[u8], field: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        let holds_field = data.get(key).map_or(false, |f| f.contains_key(field));
        if !holds_field {
            return Ok(false);
        }
        append(
            &self.journal,
            Record::with_value(key.to_vec(), field.to_vec(), Mutation::HashDel),
        )?;
        if let Some(fields) = data.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                data.remove(key);
                ttl.remove(CollectionType::Hash, key);
            }
        }
        Ok(true)
    }

    /// Remove the whole hash and its TTL.
    pub fn hclear(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        if !data.contains_key(key) {
            return Ok(false);
        }
        append(&self.journal, Record::new(key.to_vec(), Mutation::HashClear))?;
        data.remove(key);
        ttl.remove(CollectionType::Hash, key);
        Ok(true)
    }

    /// Apply a replayed journal record without journaling it again.
    pub(crate) fn apply(&self, record: &Record) -> Result<()> {
        let mut data = self.data.write();
        match record.mutation() {
            Some(Mutation::HashSet) => {
                let (field, value) = unpack_pair(&record.value)?;
                data.entry(record.key.clone()).or_default().insert(field, value);
            }
            Some(Mutation::HashDel) => {
                if let Some(fields) = data.get_mut(&record.key) {
                    fields.remove(&record.value);
                    if fields.is_empty() {
                        data.remove(&record.key);
                    }
                }
            }
            Some(Mutation::HashClear) => {
                data.remove(&record.key);
            }
            _ => {}
        }
        Ok(())
    }
}

impl TypedCollection for HashStore {
    fn collection_type(&self) -> CollectionType {
        CollectionType::Hash
    }

    fn keys(&self) -> Result<Vec<Key>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn expire_at(&self, key: &[u8], deadline: i64, ttl: &TtlRegistry) -> Result<()> {
        let data = self.data.write();
        if !data.contains_key(key) {
            return Err(KeelError::InvalidKey);
        }
        set_deadline(CollectionType::Hash, key, deadline, ttl, &self.journal)
    }

    fn evict(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        let present = data.contains_key(key);
        evict_one(CollectionType::Hash, key, present, ttl, &self.journal, || {
            data.remove(key);
            Ok(())
        })
    }

    fn sweep(&self, ttl: &TtlRegistry) -> Result<usize> {
        let mut data = self.data.write();
        let keys = data.keys().cloned().collect();
        sweep_keys(CollectionType::Hash, keys, ttl, &self.journal, |key| {
            data.remove(key);
            Ok(())
        })
    }
}

/// Sets: a key maps to a set of unique members.
#[derive(Default)]
pub struct SetStore {
    data: RwLock<HashMap<Key, HashSet<Vec<u8>>>>,
    journal: Option<Arc<Journal>>,
}

impl SetStore {
    pub fn new(journal: Option<Arc<Journal>>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Add members. Returns how many were not already present.
    pub fn sadd(&self, key: Key, members: Vec<Vec<u8>>) -> Result<usize> {
        let mut data = self.data.write();
        let mut added = 0;
        for member in members {
            if data.get(&key).map_or(false, |s| s.contains(&member)) {
                continue;
            }
            append(
                &self.journal,
                Record::with_value(key.clone(), member.clone(), Mutation::SetAdd),
            )?;
            data.entry(key.clone()).or_default().insert(member);
            added += 1;
        }
        Ok(added)
    }

    /// Remove a member. Removing the last member removes the set and its TTL.
    pub fn srem(&self, key: &[u8], member: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        if !data.get(key).map_or(false, |s| s.contains(member)) {
            return Ok(false);
        }
        append(
            &self.journal,
            Record::with_value(key.to_vec(), member.to_vec(), Mutation::SetRem),
        )?;
        Self::remove_member(&mut data, key, member, ttl);
        Ok(true)
    }

    /// Move `member` from `src` to `dst`. Returns false when `src` does not hold it.
    pub fn smove(&self, src: &[u8], dst: Key, member: Vec<u8>, ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        if !data.get(src).map_or(false, |s| s.contains(&member)) {
            return Ok(false);
        }
        if src == dst.as_slice() {
            return Ok(true);
        }
        append(
            &self.journal,
            Record::with_value(src.to_vec(), pack_pair(&dst, &member), Mutation::SetMove),
        )?;
        Self::remove_member(&mut data, src, &member, ttl);
        data.entry(dst).or_default().insert(member);
        Ok(true)
    }

    fn remove_member(
        data: &mut HashMap<Key, HashSet<Vec<u8>>>,
        key: &[u8],
        member: &[u8],
        ttl: &TtlRegistry,
    ) {
        if let Some(members) = data.get_mut(key) {
            members.remove(member);
            if members.is_empty() {
                data.remove(key);
                ttl.remove(CollectionType::Set, key);
            }
        }
    }

    /// All members, sorted. `InvalidKey` when the set does not exist.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let data = self.data.read();
        let members = data.get(key).ok_or(KeelError::InvalidKey)?;
        let mut out: Vec<_> = members.iter().cloned().collect();
        out.sort();
        Ok(out)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> bool {
        self.data
            .read()
            .get(key)
            .map_or(false, |s| s.contains(member))
    }

    /// Remove the whole set and its TTL.
    pub fn sclear(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        if !data.contains_key(key) {
            return Ok(false);
        }
        append(&self.journal, Record::new(key.to_vec(), Mutation::SetClear))?;
        data.remove(key);
        ttl.remove(CollectionType::Set, key);
        Ok(true)
    }

    /// Apply a replayed journal record without journaling it again.
    pub(crate) fn apply(&self, record: &Record) -> Result<()> {
        let mut data = self.data.write();
        match record.mutation() {
            Some(Mutation::SetAdd) => {
                data.entry(record.key.clone())
                    .or_default()
                    .insert(record.value.clone());
            }
            Some(Mutation::SetRem) => {
                if let Some(members) = data.get_mut(&record.key) {
                    members.remove(&record.value);
                    if members.is_empty() {
                        data.remove(&record.key);
                    }
                }
            }
            Some(Mutation::SetMove) => {
                let (dst, member) = unpack_pair(&record.value)?;
                if dst == record.key {
                    return Ok(());
                }
                if let Some(members) = data.get_mut(&record.key) {
                    members.remove(&member);
                    if members.is_empty() {
                        data.remove(&record.key);
                    }
                }
                data.entry(dst).or_default().insert(member);
            }
            Some(Mutation::SetClear) => {
                data.remove(&record.key);
            }
            _ => {}
        }
        Ok(())
    }
}

impl TypedCollection for SetStore {
    fn collection_type(&self) -> CollectionType {
        CollectionType::Set
    }

    fn keys(&self) -> Result<Vec<Key>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn expire_at(&self, key: &[u8], deadline: i64, ttl: &TtlRegistry) -> Result<()> {
        let data = self.data.write();
        if !data.contains_key(key) {
            return Err(KeelError::InvalidKey);
        }
        set_deadline(CollectionType::Set, key, deadline, ttl, &self.journal)
    }

    fn evict(&self, key: &[u8], ttl: &TtlRegistry) -> Result<bool> {
        let mut data = self.data.write();
        let present = data.contains_key(key);
        evict_one(CollectionType::Set, key, present, ttl, &self.journal, || {
            data.remove(key);
            Ok(())
        })
    }

    fn sweep(&self, ttl: &TtlRegistry) -> Result<usize> {
        let mut data = self.data.write();
        let keys = data.keys().cloned().collect();
        sweep_keys(CollectionType::Set, keys, ttl, &self.journal, |key| {
            data.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn past() -> i64 {
        unix_secs() - 1
    }

    #[test]
    fn test_string_lazy_eviction() {
        let ttl = TtlRegistry::new();
        let strings = StringStore::new(Store::in_memory(), None);
        strings.set(b"session".to_vec(), b"token".to_vec(), &ttl).unwrap();
        strings.expire_at(b"session", past(), &ttl).unwrap();

        assert!(strings.evict(b"session", &ttl).unwrap());
        assert!(!strings.contains(b"session").unwrap());
        assert_eq!(ttl.get_ttl(CollectionType::String, b"session"), None);

        // The sweeper finds nothing left to do.
        assert_eq!(strings.sweep(&ttl).unwrap(), 0);
        assert!(!strings.evict(b"session", &ttl).unwrap());
    }

    #[test]
    fn test_unexpired_key_is_kept() {
        let ttl = TtlRegistry::new();
        let strings = StringStore::new(Store::in_memory(), None);
        strings.set(b"k".to_vec(), b"v".to_vec(), &ttl).unwrap();
        strings.expire_at(b"k", unix_secs() + 60, &ttl).unwrap();
        assert!(!strings.evict(b"k", &ttl).unwrap());
        assert_eq!(strings.sweep(&ttl).unwrap(), 0);
        assert_eq!(strings.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn test_expire_missing_key_is_invalid() {
        let ttl = TtlRegistry::new();
        let hashes = HashStore::new(None);
        assert!(matches!(
            hashes.expire_at(b"nope", past(), &ttl),
            Err(KeelError::InvalidKey)
        ));
        assert!(ttl.is_empty());
    }

    #[test]
    fn test_hash_operations() {
        let ttl = TtlRegistry::new();
        let hashes = HashStore::new(None);
        assert!(hashes.hset(b"user".to_vec(), b"name".to_vec(), b"ada".to_vec()).unwrap());
        assert!(!hashes.hset(b"user".to_vec(), b"name".to_vec(), b"grace".to_vec()).unwrap());
        hashes.hset(b"user".to_vec(), b"age".to_vec(), b"36".to_vec()).unwrap();

        assert_eq!(hashes.hget(b"user", b"name").unwrap(), b"grace");
        assert!(matches!(hashes.hget(b"user", b"email"), Err(KeelError::KeyNotFound)));
        assert!(matches!(hashes.hget(b"ghost", b"name"), Err(KeelError::InvalidKey)));
        assert_eq!(
            hashes.hgetall(b"user").unwrap(),
            vec![
                (b"age".to_vec(), b"36".to_vec()),
                (b"name".to_vec(), b"grace".to_vec())
            ]
        );

        assert!(hashes.hdel(b"user", b"age", &ttl).unwrap());
        assert!(!hashes.hdel(b"user", b"age", &ttl).unwrap());
        assert!(hashes.hclear(b"user", &ttl).unwrap());
        assert!(!hashes.contains(b"user").unwrap());
    }

    #[test]
    fn test_last_field_removal_drops_ttl() {
        let ttl = TtlRegistry::new();
        let hashes = HashStore::new(None);
        hashes.hset(b"h".to_vec(), b"f".to_vec(), b"v".to_vec()).unwrap();
        hashes.expire_at(b"h", unix_secs() + 60, &ttl).unwrap();
        hashes.hdel(b"h", b"f", &ttl).unwrap();
        assert!(!hashes.contains(b"h").unwrap());
        assert_eq!(ttl.get_ttl(CollectionType::Hash, b"h"), None);
    }

    #[test]
    fn test_hash_sweep() {
        let ttl = TtlRegistry::new();
        let hashes = HashStore::new(None);
        for key in ["a", "b", "c"] {
            hashes.hset(key.as_bytes().to_vec(), b"f".to_vec(), b"v".to_vec()).unwrap();
        }
        hashes.expire_at(b"a", past(), &ttl).unwrap();
        hashes.expire_at(b"b", past(), &ttl).unwrap();

        assert_eq!(hashes.sweep(&ttl).unwrap(), 2);
        assert_eq!(hashes.keys().unwrap(), vec![b"c".to_vec()]);
        assert!(ttl.is_empty());
        assert_eq!(hashes.sweep(&ttl).unwrap(), 0);
    }

    #[test]
    fn test_set_operations() {
        let ttl = TtlRegistry::new();
        let sets = SetStore::new(None);
        let added = sets
            .sadd(b"tags".to_vec(), vec![b"rust".to_vec(), b"db".to_vec(), b"rust".to_vec()])
            .unwrap();
        assert_eq!(added, 2);
        assert!(sets.sismember(b"tags", b"db"));
        assert_eq!(sets.smembers(b"tags").unwrap(), vec![b"db".to_vec(), b"rust".to_vec()]);

        assert!(sets.smove(b"tags", b"moved".to_vec(), b"db".to_vec(), &ttl).unwrap());
        assert!(!sets.sismember(b"tags", b"db"));
        assert!(sets.sismember(b"moved", b"db"));

        assert!(sets.srem(b"tags", b"rust", &ttl).unwrap());
        assert!(!sets.contains(b"tags").unwrap());
        assert!(matches!(sets.smembers(b"tags"), Err(KeelError::InvalidKey)));
        assert!(sets.sclear(b"moved", &ttl).unwrap());
        assert!(!sets.sclear(b"moved", &ttl).unwrap());
    }

    #[test]
    fn test_set_lazy_then_sweep_is_idempotent() {
        let ttl = TtlRegistry::new();
        let sets = SetStore::new(None);
        sets.sadd(b"s".to_vec(), vec![b"m".to_vec()]).unwrap();
        sets.expire_at(b"s", past(), &ttl).unwrap();

        assert!(sets.evict(b"s", &ttl).unwrap());
        assert_eq!(sets.sweep(&ttl).unwrap(), 0);
        assert!(!sets.evict(b"s", &ttl).unwrap());
    }

    #[test]
    fn test_journaled_mutations_replay() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::open(dir.path().join("journal.log"), 0o644, false).unwrap());
        let ttl = TtlRegistry::new();

        let sets = SetStore::new(Some(journal.clone()));
        sets.sadd(b"a".to_vec(), vec![b"1".to_vec(), b"2".to_vec()]).unwrap();
        sets.smove(b"a", b"b".to_vec(), b"2".to_vec(), &ttl).unwrap();
        let hashes = HashStore::new(Some(journal.clone()));
        hashes.hset(b"h".to_vec(), b"f".to_vec(), b"v".to_vec()).unwrap();
        hashes.hset(b"h".to_vec(), b"g".to_vec(), b"w".to_vec()).unwrap();
        hashes.hdel(b"h", b"f", &ttl).unwrap();

        let replayed_sets = SetStore::new(None);
        let replayed_hashes = HashStore::new(None);
        for record in journal.recover().unwrap() {
            match record.mutation().unwrap().collection_type() {
                CollectionType::Set => replayed_sets.apply(&record).unwrap(),
                CollectionType::Hash => replayed_hashes.apply(&record).unwrap(),
                CollectionType::String => {}
            }
        }
        assert_eq!(replayed_sets.smembers(b"a").unwrap(), vec![b"1".to_vec()]);
        assert_eq!(replayed_sets.smembers(b"b").unwrap(), vec![b"2".to_vec()]);
        assert_eq!(
            replayed_hashes.hgetall(b"h").unwrap(),
            vec![(b"g".to_vec(), b"w".to_vec())]
        );
    }

    #[test]
    fn test_smove_onto_same_set_keeps_ttl() {
        let ttl = TtlRegistry::new();
        let sets = SetStore::new(None);
        sets.sadd(b"s".to_vec(), vec![b"m".to_vec()]).unwrap();
        let deadline = unix_secs() + 100;
        sets.expire_at(b"s", deadline, &ttl).unwrap();

        assert!(sets.smove(b"s", b"s".to_vec(), b"m".to_vec(), &ttl).unwrap());
        assert!(!sets.smove(b"s", b"s".to_vec(), b"x".to_vec(), &ttl).unwrap());
        assert_eq!(sets.smembers(b"s").unwrap(), vec![b"m".to_vec()]);
        assert_eq!(ttl.get_ttl(CollectionType::Set, b"s"), Some(deadline));

        // Journals written before the no-op replay the same way.
        let replayed = SetStore::new(None);
        replayed.apply(&Record::with_value(b"s".to_vec(), b"m".to_vec(), Mutation::SetAdd)).unwrap();
        replayed
            .apply(&Record::with_value(b"s".to_vec(), pack_pair(b"s", b"m"), Mutation::SetMove))
            .unwrap();
        assert!(replayed.sismember(b"s", b"m"));
    }

    #[test]
    fn test_string_set_clears_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::open(dir.path().join("journal.log"), 0o644, false).unwrap());
        let ttl = TtlRegistry::new();
        let strings = StringStore::new(Store::in_memory(), Some(journal.clone()));

        strings.set(b"k".to_vec(), b"old".to_vec(), &ttl).unwrap();
        strings.expire_at(b"k", unix_secs() + 60, &ttl).unwrap();
        strings.set(b"k".to_vec(), b"new".to_vec(), &ttl).unwrap();

        assert_eq!(ttl.get_ttl(CollectionType::String, b"k"), None);
        let mutations: Vec<_> = journal
            .recover()
            .unwrap()
            .iter()
            .map(|r| r.mutation().unwrap())
            .collect();
        assert_eq!(mutations, vec![Mutation::StringExpire, Mutation::StringRem]);
    }

    #[test]
    fn test_failed_removal_journals_deadline_again() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Some(Arc::new(
            Journal::open(dir.path().join("journal.log"), 0o644, false).unwrap(),
        ));
        let ttl = TtlRegistry::new();
        let deadline = unix_secs() - 1;
        ttl.set_ttl(CollectionType::String, b"k".to_vec(), deadline);

        let result = evict_one(CollectionType::String, b"k", true, &ttl, &journal, || {
            Err(KeelError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        });
        assert!(matches!(result, Err(KeelError::Io(_))));
        assert_eq!(ttl.get_ttl(CollectionType::String, b"k"), Some(deadline));

        let records = journal.as_ref().unwrap().recover().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mutation(), Some(Mutation::StringRem));
        assert_eq!(records[1].mutation(), Some(Mutation::StringExpire));
        assert_eq!(records[1].timestamp as i64, deadline);
    }

    #[test]
    fn test_pack_pair() {
        let packed = pack_pair(b"field", b"value");
        assert_eq!(unpack_pair(&packed).unwrap(), (b"field".to_vec(), b"value".to_vec()));
        assert!(matches!(unpack_pair(&[0, 0]), Err(KeelError::Corruption(_))));
        assert!(matches!(unpack_pair(&[0, 0, 0, 9, 1]), Err(KeelError::Corruption(_))));
    }
}
