//! KEEL - Core Type Definitions
//! Defines fundamental types used across the storage engine.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{KeelError, Result};

/// Key type for the storage engine.
/// Using Vec<u8> allows arbitrary binary keys.
pub type Key = Vec<u8>;

/// Value type for the storage engine.
pub type Value = Vec<u8>;

/// The closed set of encodings accepted for keys and values.
///
/// Integers are written big-endian so unsigned keys sort numerically
/// under byte-lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    /// Raw bytes, stored as-is.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    /// Opaque pre-serialized payload. Build one with [`Datum::blob`].
    Blob(Vec<u8>),
}

impl Datum {
    /// Serialize any serde value into an opaque blob.
    pub fn blob<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Datum::Blob(bincode::serialize(value)?))
    }

    /// Decode a blob previously produced by [`Datum::blob`].
    pub fn decode_blob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Binary form written to disk.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Datum::Bytes(b) | Datum::Blob(b) => b,
            Datum::Text(s) => s.into_bytes(),
            Datum::U32(n) => n.to_be_bytes().to_vec(),
            Datum::U64(n) => n.to_be_bytes().to_vec(),
            Datum::I32(n) => n.to_be_bytes().to_vec(),
            Datum::I64(n) => n.to_be_bytes().to_vec(),
        }
    }

    /// Binary form, validated for use as a key: non-empty and at most
    /// `u16::MAX` bytes (the width of the index log's key size field).
    pub fn into_key(self) -> Result<Key> {
        let key = self.into_bytes();
        if key.is_empty() || key.len() > u16::MAX as usize {
            return Err(KeelError::InvalidKey);
        }
        Ok(key)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Bytes(v)
    }
}

impl From<&[u8]> for Datum {
    fn from(v: &[u8]) -> Self {
        Datum::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Datum {
    fn from(v: &[u8; N]) -> Self {
        Datum::Bytes(v.to_vec())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_owned())
    }
}

impl From<u32> for Datum {
    fn from(v: u32) -> Self {
        Datum::U32(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::U64(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::I32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::I64(v)
    }
}

/// Logical data shape a key belongs to. Scopes TTLs and journal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CollectionType {
    String = 0,
    Hash = 1,
    Set = 2,
}

impl CollectionType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CollectionType::String),
            1 => Some(CollectionType::Hash),
            2 => Some(CollectionType::Set),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionType::String => f.write_str("string"),
            CollectionType::Hash => f.write_str("hash"),
            CollectionType::Set => f.write_str("set"),
        }
    }
}

/// Current UNIX time in seconds. TTL deadlines use this clock.
pub fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current UNIX time in nanoseconds. Value records are stamped with this.
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[test]
    fn test_integer_encoding_is_big_endian() {
        assert_eq!(Datum::from(1u32).into_bytes(), vec![0, 0, 0, 1]);
        assert_eq!(Datum::from(-1i64).into_bytes(), vec![0xFF; 8]);
    }

    #[test]
    fn test_unsigned_keys_sort_numerically() {
        let small = Datum::from(9u64).into_bytes();
        let large = Datum::from(10u64).into_bytes();
        assert!(small < large);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(Datum::from("").into_key(), Err(KeelError::InvalidKey)));
        let oversized = vec![b'k'; u16::MAX as usize + 1];
        assert!(matches!(Datum::from(oversized).into_key(), Err(KeelError::InvalidKey)));
    }

    #[test]
    fn test_blob_decodes_back() {
        let profile = Profile { name: "keel".into(), visits: 3 };
        let bytes = Datum::blob(&profile).unwrap().into_bytes();
        let decoded: Profile = Datum::decode_blob(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn test_collection_type_tags() {
        for kind in [CollectionType::String, CollectionType::Hash, CollectionType::Set] {
            assert_eq!(CollectionType::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(CollectionType::from_u8(7), None);
    }
}
