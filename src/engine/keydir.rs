//! KEEL - Key Directory
//! In-memory index from key to its current on-disk location, with a
//! byte-sorted key sequence for prefix and range queries.
//!
//! The sorted sequence is a flat `Vec`. Lookups are binary searches;
//! inserting or removing a key shifts the tail, which is O(n). That cost is
//! accepted in exchange for cache-friendly scans and trivial paging by index.

use std::collections::HashMap;

use crate::error::KeelError;
use crate::types::{Key, Value};

/// Location of a live key's value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    /// Offset into the value log.
    pub seek: u32,
    /// Value length in bytes.
    pub size: u32,
    /// Offset of the key's entry in the index log.
    pub key_seek: u32,
    /// The value itself when the store preloads values.
    pub value: Option<Value>,
}

/// A failed exact lookup. `boundary`, when present, is a valid index to
/// begin a scan from in the requested direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound {
    pub boundary: Option<usize>,
}

impl From<NotFound> for KeelError {
    fn from(_: NotFound) -> Self {
        KeelError::KeyNotFound
    }
}

/// Map plus sorted sequence. Both always hold the same key set.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: Vec<Key>,
    entries: HashMap<Key, DirectoryEntry>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&DirectoryEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// The key sequence. Sorted unless a replay is still in progress.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn is_sorted(&self) -> bool {
        self.keys.windows(2).all(|w| w[0] <= w[1])
    }

    /// Sort the key sequence, skipping the work when it already is.
    pub fn sort(&mut self) {
        if !self.is_sorted() {
            self.keys.sort_unstable();
        }
    }

    /// Insert or update `key`, keeping the sequence sorted.
    /// Returns true when the key is new.
    pub fn upsert(&mut self, key: Key, entry: DirectoryEntry) -> bool {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = entry;
            return false;
        }
        self.sort();
        let pos = self.lower_bound(&key);
        self.keys.insert(pos, key.clone());
        self.entries.insert(key, entry);
        true
    }

    /// Insert or update `key`, appending new keys to the end of the sequence.
    /// Used during replay; [`KeyDirectory::sort`] must run before any search.
    pub(crate) fn upsert_unsorted(&mut self, key: Key, entry: DirectoryEntry) -> bool {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = entry;
            return false;
        }
        self.keys.push(key.clone());
        self.entries.insert(key, entry);
        true
    }

    /// Remove `key` from both structures.
    pub fn remove(&mut self, key: &[u8]) -> Option<DirectoryEntry> {
        let entry = self.entries.remove(key)?;
        self.sort();
        let pos = self.lower_bound(key);
        if self.keys.get(pos).map(Vec::as_slice) == Some(key) {
            self.keys.remove(pos);
        }
        Some(entry)
    }

    /// First index whose key is `>= target`.
    fn lower_bound(&self, target: &[u8]) -> usize {
        debug_assert!(self.is_sorted());
        self.keys.partition_point(|k| k.as_slice() < target)
    }

    /// Index of `key`. Without a key the lookup misses but reports the
    /// first (ascending) or last (descending) index as the boundary.
    /// A missing key reports where a scan in that direction would start.
    pub fn find_key(&self, key: Option<&[u8]>, ascending: bool) -> Result<usize, NotFound> {
        let len = self.keys.len();
        let key = match key {
            Some(key) => key,
            None => {
                let boundary = if ascending {
                    (len > 0).then_some(0)
                } else {
                    len.checked_sub(1)
                };
                return Err(NotFound { boundary });
            }
        };

        let pos = self.lower_bound(key);
        if pos < len && self.keys[pos] == key {
            return Ok(pos);
        }
        let boundary = if ascending {
            (pos < len).then_some(pos)
        } else {
            pos.checked_sub(1)
        };
        Err(NotFound { boundary })
    }

    /// Where a prefix scan starts. Ascending: the first key `>= prefix`
    /// (which may not carry the prefix; scans stop at the first key that
    /// does not). Descending: the last key that starts with `prefix`.
    pub fn found_prefix(&self, prefix: &[u8], ascending: bool) -> Option<usize> {
        if ascending {
            let pos = self.lower_bound(prefix);
            return (pos < self.keys.len()).then_some(pos);
        }
        // Keys carrying the prefix form one contiguous run right after the
        // keys that sort below it.
        let end = self
            .keys
            .partition_point(|k| k.as_slice() < prefix || k.starts_with(prefix));
        let last = end.checked_sub(1)?;
        self.keys[last].starts_with(prefix).then_some(last)
    }

    /// Keys in the inclusive window `[start, end]`, walked in scan order.
    pub fn window(&self, start: usize, end: usize, ascending: bool) -> Vec<Key> {
        if ascending {
            self.keys[start..=end].to_vec()
        } else {
            self.keys[end..=start].iter().rev().cloned().collect()
        }
    }
}

/// Compute the inclusive index window of a paged scan.
///
/// `found` is where the scan starts, `exclude_from` how many leading matches
/// to skip (1 when the start key itself must not be returned). `limit == 0`
/// runs to the end of the directory in the scan direction. Returns `None`
/// when the window is empty.
pub fn check_interval(
    found: usize,
    limit: usize,
    offset: usize,
    exclude_from: usize,
    len: usize,
    ascending: bool,
) -> Option<(usize, usize)> {
    if len == 0 || found >= len {
        return None;
    }
    let skip = offset.saturating_add(exclude_from);

    if ascending {
        let start = found.saturating_add(skip);
        if start >= len {
            return None;
        }
        let end = match limit {
            0 => len - 1,
            _ => start.saturating_add(limit - 1).min(len - 1),
        };
        Some((start, end))
    } else {
        let start = found.checked_sub(skip)?;
        let end = match limit {
            0 => 0,
            _ => start.saturating_sub(limit - 1),
        };
        Some((start, end))
    }
}
