//! KEEL - Record Codec
//! Binary encoding of a single typed mutation.
//!
//! ## Binary Format (big-endian)
//! ```text
//! [key_size: 4][value_size: 4][state: 2][timestamp: 8][key][value]
//! ```
//! `state` packs `(collection_type << 8) | mark`.

use bytes::{Buf, BufMut};

use crate::error::{KeelError, Result};
use crate::types::{unix_nanos, CollectionType, Key, Value};

/// Size of the fixed record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 18;

/// Every mutation the journal knows about, grouped by collection type.
/// The discriminant inside each group is the on-disk mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    StringSet,
    StringRem,
    StringExpire,
    HashSet,
    HashDel,
    HashClear,
    HashExpire,
    SetAdd,
    SetRem,
    SetMove,
    SetClear,
    SetExpire,
}

impl Mutation {
    pub fn collection_type(self) -> CollectionType {
        match self {
            Mutation::StringSet | Mutation::StringRem | Mutation::StringExpire => {
                CollectionType::String
            }
            Mutation::HashSet | Mutation::HashDel | Mutation::HashClear | Mutation::HashExpire => {
                CollectionType::Hash
            }
            _ => CollectionType::Set,
        }
    }

    pub fn mark(self) -> u8 {
        match self {
            Mutation::StringSet | Mutation::HashSet | Mutation::SetAdd => 0,
            Mutation::StringRem | Mutation::HashDel | Mutation::SetRem => 1,
            Mutation::StringExpire | Mutation::HashClear | Mutation::SetMove => 2,
            Mutation::HashExpire | Mutation::SetClear => 3,
            Mutation::SetExpire => 4,
        }
    }

    /// The packed 16-bit state word.
    pub fn state(self) -> u16 {
        ((self.collection_type() as u16) << 8) | self.mark() as u16
    }

    pub fn from_state(state: u16) -> Option<Self> {
        let kind = CollectionType::from_u8((state >> 8) as u8)?;
        let mutation = match (kind, state & 0xFF) {
            (CollectionType::String, 0) => Mutation::StringSet,
            (CollectionType::String, 1) => Mutation::StringRem,
            (CollectionType::String, 2) => Mutation::StringExpire,
            (CollectionType::Hash, 0) => Mutation::HashSet,
            (CollectionType::Hash, 1) => Mutation::HashDel,
            (CollectionType::Hash, 2) => Mutation::HashClear,
            (CollectionType::Hash, 3) => Mutation::HashExpire,
            (CollectionType::Set, 0) => Mutation::SetAdd,
            (CollectionType::Set, 1) => Mutation::SetRem,
            (CollectionType::Set, 2) => Mutation::SetMove,
            (CollectionType::Set, 3) => Mutation::SetClear,
            (CollectionType::Set, 4) => Mutation::SetExpire,
            _ => return None,
        };
        Some(mutation)
    }

    /// The removal that lazy eviction and sweeps journal for a type.
    pub fn clear_for(kind: CollectionType) -> Self {
        match kind {
            CollectionType::String => Mutation::StringRem,
            CollectionType::Hash => Mutation::HashClear,
            CollectionType::Set => Mutation::SetClear,
        }
    }

    pub fn expire_for(kind: CollectionType) -> Self {
        match kind {
            CollectionType::String => Mutation::StringExpire,
            CollectionType::Hash => Mutation::HashExpire,
            CollectionType::Set => Mutation::SetExpire,
        }
    }

    /// Whether the record timestamp is an absolute deadline (seconds)
    /// rather than a creation time (nanoseconds).
    pub fn is_expire(self) -> bool {
        matches!(
            self,
            Mutation::StringExpire | Mutation::HashExpire | Mutation::SetExpire
        )
    }
}

/// A logical mutation as written to the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
    pub state: u16,
    /// Creation time in nanoseconds, or the expiry deadline in seconds
    /// for expire records. See [`Mutation::is_expire`].
    pub timestamp: u64,
}

impl Record {
    /// A record without a value (removals, clears).
    pub fn new(key: Key, mutation: Mutation) -> Self {
        Self::with_value(key, Vec::new(), mutation)
    }

    /// A record carrying a value, stamped with the current time.
    pub fn with_value(key: Key, value: Value, mutation: Mutation) -> Self {
        Self {
            key,
            value,
            state: mutation.state(),
            timestamp: unix_nanos(),
        }
    }

    /// An expire record whose timestamp is the absolute `deadline`.
    pub fn with_expire(key: Key, deadline: i64, kind: CollectionType) -> Self {
        Self {
            key,
            value: Vec::new(),
            state: Mutation::expire_for(kind).state(),
            timestamp: deadline.max(0) as u64,
        }
    }

    /// Collection type half of `state`.
    pub fn kind(&self) -> u8 {
        (self.state >> 8) as u8
    }

    /// Mark half of `state`.
    pub fn mark(&self) -> u8 {
        (self.state & 0xFF) as u8
    }

    pub fn mutation(&self) -> Option<Mutation> {
        Mutation::from_state(self.state)
    }

    /// Total encoded size.
    pub fn size(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.key.is_empty() {
            return Err(KeelError::InvalidEntry);
        }
        let key_size = u32::try_from(self.key.len()).map_err(|_| KeelError::InvalidEntry)?;
        let value_size = u32::try_from(self.value.len()).map_err(|_| KeelError::InvalidEntry)?;

        let mut buf = Vec::with_capacity(self.size());
        buf.put_u32(key_size);
        buf.put_u32(value_size);
        buf.put_u16(self.state);
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        Ok(buf)
    }

    /// Decode one record from the front of `buf`.
    ///
    /// # Panics
    /// If `buf` is shorter than the header plus the sizes it declares.
    /// Callers frame records and must hand over a complete one.
    pub fn decode(mut buf: &[u8]) -> Self {
        let key_size = buf.get_u32() as usize;
        let value_size = buf.get_u32() as usize;
        let state = buf.get_u16();
        let timestamp = buf.get_u64();
        let key = buf[..key_size].to_vec();
        let value = buf[key_size..key_size + value_size].to_vec();
        Self {
            key,
            value,
            state,
            timestamp,
        }
    }

    /// Read the two size fields of an encoded header.
    pub fn peek_sizes(header: &[u8; RECORD_HEADER_SIZE]) -> (usize, usize) {
        let mut buf = &header[..];
        let key_size = buf.get_u32() as usize;
        let value_size = buf.get_u32() as usize;
        (key_size, value_size)
    }
}
