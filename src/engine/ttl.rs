//! KEEL - Time-To-Live (TTL) Registry
//! Expiry deadlines for collection-scoped keys, shared by every typed
//! collection and the background sweepers.
//!
//! ## Design
//! - Deadlines are absolute Unix timestamps in seconds
//! - Keys are scoped by collection type, so a string and a hash may share a name
//! - A key without an entry never expires
//!
//! ## Lock ordering
//! The registry has its own lock. Callers that also hold a collection lock
//! must take the collection lock first.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{unix_secs, CollectionType, Key};

/// Shared map of `(collection type, key)` to expiry deadline.
#[derive(Debug, Default)]
pub struct TtlRegistry {
    expirations: RwLock<HashMap<(CollectionType, Key), i64>>,
}

impl TtlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute expiry deadline (seconds since the epoch).
    pub fn set_ttl(&self, kind: CollectionType, key: Key, deadline: i64) {
        self.expirations.write().insert((kind, key), deadline);
    }

    /// The absolute deadline of a key, if it has one.
    pub fn get_ttl(&self, kind: CollectionType, key: &[u8]) -> Option<i64> {
        // Tuple keys cannot be borrowed as `(CollectionType, &[u8])`.
        self.expirations.read().get(&(kind, key.to_vec())).copied()
    }

    /// Remove a key's TTL (make it persistent). Returns true if one existed.
    pub fn remove(&self, kind: CollectionType, key: &[u8]) -> bool {
        self.expirations.write().remove(&(kind, key.to_vec())).is_some()
    }

    /// True iff the key has a TTL and the current time is past it.
    pub fn has_expired(&self, kind: CollectionType, key: &[u8]) -> bool {
        self.has_expired_at(kind, key, unix_secs())
    }

    pub fn has_expired_at(&self, kind: CollectionType, key: &[u8], now: i64) -> bool {
        match self.get_ttl(kind, key) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// Seconds left before the key expires. `None` if it has no TTL,
    /// `Some(0)` once the deadline passed.
    pub fn remaining(&self, kind: CollectionType, key: &[u8]) -> Option<i64> {
        self.get_ttl(kind, key)
            .map(|deadline| (deadline - unix_secs()).max(0))
    }

    /// Number of keys with a TTL.
    pub fn len(&self) -> usize {
        self.expirations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_check_ttl() {
        let ttl = TtlRegistry::new();
        ttl.set_ttl(CollectionType::String, b"key1".to_vec(), unix_secs() + 10);
        assert!(!ttl.has_expired(CollectionType::String, b"key1"));
        assert!(ttl.remaining(CollectionType::String, b"key1").unwrap() > 0);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let ttl = TtlRegistry::new();
        assert!(!ttl.has_expired(CollectionType::Hash, b"no_ttl_key"));
        assert_eq!(ttl.remaining(CollectionType::Hash, b"no_ttl_key"), None);
    }

    #[test]
    fn test_past_deadline_expires() {
        let ttl = TtlRegistry::new();
        ttl.set_ttl(CollectionType::Set, b"old".to_vec(), unix_secs() - 1);
        assert!(ttl.has_expired(CollectionType::Set, b"old"));
        assert_eq!(ttl.remaining(CollectionType::Set, b"old"), Some(0));
    }

    #[test]
    fn test_deadline_itself_is_not_expired() {
        let ttl = TtlRegistry::new();
        ttl.set_ttl(CollectionType::String, b"k".to_vec(), 100);
        assert!(!ttl.has_expired_at(CollectionType::String, b"k", 100));
        assert!(ttl.has_expired_at(CollectionType::String, b"k", 101));
    }

    #[test]
    fn test_types_are_separate_scopes() {
        let ttl = TtlRegistry::new();
        ttl.set_ttl(CollectionType::String, b"k".to_vec(), 0);
        assert!(ttl.has_expired(CollectionType::String, b"k"));
        assert!(!ttl.has_expired(CollectionType::Hash, b"k"));
    }

    #[test]
    fn test_remove_ttl() {
        let ttl = TtlRegistry::new();
        ttl.set_ttl(CollectionType::String, b"key".to_vec(), 0);
        assert_eq!(ttl.len(), 1);
        assert!(ttl.remove(CollectionType::String, b"key"));
        assert!(!ttl.remove(CollectionType::String, b"key"));
        assert!(ttl.is_empty());
    }
}
