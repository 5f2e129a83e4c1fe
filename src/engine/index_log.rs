//! KEEL - Key Index Log
//! Append-only log of key locations, replayed on open to rebuild the
//! in-memory key directory.
//!
//! ## Binary Format (per entry, big-endian)
//! ```text
//! [version: 1][kind: 1][value_seek: 4][value_size: 4][timestamp: 4][key_size: 2][key]
//! ```
//! Entries are never split or compressed, so the offset of the next entry
//! is always `offset + 16 + key_size`. An existing key's entry is rewritten
//! in place when only its value location changes.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use super::value_log::{open_rw, to_u32, write_at_pos};
use crate::error::{KeelError, Result};
use crate::types::{unix_secs, Key};

/// Size of the fixed index entry header in bytes.
pub const INDEX_HEADER_SIZE: usize = 16;

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 0;

/// Operation type for index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    Set = 0,
    Delete = 1,
}

/// One decoded index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub version: u8,
    pub kind: EntryKind,
    pub seek: u32,
    pub size: u32,
    /// Seconds since the UNIX epoch, truncated to 32 bits.
    pub timestamp: u32,
    pub key: Key,
}

impl IndexEntry {
    pub fn set(key: Key, seek: u32, size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            kind: EntryKind::Set,
            seek,
            size,
            timestamp: unix_secs() as u32,
            key,
        }
    }

    pub fn delete(key: Key) -> Self {
        Self {
            kind: EntryKind::Delete,
            ..Self::set(key, 0, 0)
        }
    }

    /// Bytes this entry occupies on disk.
    pub fn encoded_len(&self) -> usize {
        INDEX_HEADER_SIZE + self.key.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let key_size = u16::try_from(self.key.len()).map_err(|_| KeelError::InvalidKey)?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.seek);
        buf.put_u32(self.size);
        buf.put_u32(self.timestamp);
        buf.put_u16(key_size);
        buf.put_slice(&self.key);
        Ok(buf)
    }

    /// Decode the fixed header. Returns the entry with an empty key and the
    /// number of key bytes that follow.
    fn decode_header(header: &[u8; INDEX_HEADER_SIZE]) -> Result<(Self, usize)> {
        let mut buf = &header[..];
        let version = buf.get_u8();
        let kind = match buf.get_u8() {
            0 => EntryKind::Set,
            1 => EntryKind::Delete,
            other => {
                return Err(KeelError::Corruption(format!(
                    "unknown index entry kind {}",
                    other
                )))
            }
        };
        let seek = buf.get_u32();
        let size = buf.get_u32();
        let timestamp = buf.get_u32();
        let key_size = buf.get_u16() as usize;
        let entry = Self {
            version,
            kind,
            seek,
            size,
            timestamp,
            key: Vec::new(),
        };
        Ok((entry, key_size))
    }
}

/// Fill `buf` as far as the reader allows. Returns the bytes read,
/// which is short only at end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Key metadata log for one store.
pub struct IndexLog {
    path: PathBuf,
    file: File,
    sync_writes: bool,
}

impl IndexLog {
    pub fn open(path: PathBuf, file_mode: u32, sync_writes: bool) -> Result<Self> {
        let file = open_rw(&path, file_mode)?;
        Ok(Self {
            path,
            file,
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entry` at `key_seek`, or append when `None`.
    /// Returns the offset the entry now lives at.
    pub fn write(&self, entry: &IndexEntry, key_seek: Option<u32>) -> Result<u32> {
        let encoded = entry.encode()?;
        let offset = write_at_pos(&self.file, &encoded, key_seek.map(u64::from))?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        to_u32(offset, "index offset")
    }

    /// Stream every entry in file order, handing each to `apply` together
    /// with the offset it was read from. A torn trailing entry is cut off
    /// so later appends start on an entry boundary.
    /// Returns the number of entries replayed.
    pub fn replay<F>(&self, mut apply: F) -> Result<usize>
    where
        F: FnMut(IndexEntry, u32) -> Result<()>,
    {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(0))?;

        let mut read_seek: u64 = 0;
        let mut count = 0;
        let mut header = [0u8; INDEX_HEADER_SIZE];
        loop {
            let n = read_full(&mut reader, &mut header)?;
            if n == 0 {
                break;
            }
            if n < INDEX_HEADER_SIZE {
                self.truncate_torn_tail(read_seek)?;
                break;
            }
            let (mut entry, key_size) = IndexEntry::decode_header(&header)?;
            let mut key = vec![0u8; key_size];
            if read_full(&mut reader, &mut key)? < key_size {
                self.truncate_torn_tail(read_seek)?;
                break;
            }
            entry.key = key;

            apply(entry, to_u32(read_seek, "index offset")?)?;
            read_seek += (INDEX_HEADER_SIZE + key_size) as u64;
            count += 1;
        }
        Ok(count)
    }

    fn truncate_torn_tail(&self, valid_len: u64) -> Result<()> {
        log::warn!(
            "Index log {:?} ends with a torn entry, truncating to {} bytes",
            self.path,
            valid_len
        );
        self.file.set_len(valid_len)?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(dir: &tempfile::TempDir) -> IndexLog {
        IndexLog::open(dir.path().join("values.idx"), 0o644, false).unwrap()
    }

    fn collect(log: &IndexLog) -> Vec<(IndexEntry, u32)> {
        let mut out = Vec::new();
        log.replay(|entry, offset| {
            out.push((entry, offset));
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn test_header_layout() {
        let mut entry = IndexEntry::set(b"abc".to_vec(), 7, 9);
        entry.timestamp = 0x01020304;
        let buf = entry.encode().unwrap();
        assert_eq!(buf.len(), 19);
        assert_eq!(buf[0], FORMAT_VERSION);
        assert_eq!(buf[1], 0);
        assert_eq!(&buf[2..6], &7u32.to_be_bytes());
        assert_eq!(&buf[6..10], &9u32.to_be_bytes());
        assert_eq!(&buf[10..14], &[1, 2, 3, 4]);
        assert_eq!(&buf[14..16], &3u16.to_be_bytes());
        assert_eq!(&buf[16..], b"abc");
    }

    #[test]
    fn test_replay_tracks_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_temp(&dir);
        assert_eq!(log.write(&IndexEntry::set(b"a".to_vec(), 0, 4), None).unwrap(), 0);
        assert_eq!(log.write(&IndexEntry::set(b"bb".to_vec(), 4, 2), None).unwrap(), 17);
        assert_eq!(log.write(&IndexEntry::delete(b"a".to_vec()), None).unwrap(), 35);

        let entries = collect(&log);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1, 0);
        assert_eq!(entries[1].1, 17);
        assert_eq!(entries[2].1, 35);
        assert_eq!(entries[1].0.key, b"bb");
        assert_eq!(entries[2].0.kind, EntryKind::Delete);
    }

    #[test]
    fn test_rewrite_in_place_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_temp(&dir);
        log.write(&IndexEntry::set(b"key".to_vec(), 0, 4), None).unwrap();
        let before = log.len().unwrap();
        log.write(&IndexEntry::set(b"key".to_vec(), 100, 10), Some(0)).unwrap();
        assert_eq!(log.len().unwrap(), before);

        let entries = collect(&log);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.seek, 100);
        assert_eq!(entries[0].0.size, 10);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_temp(&dir);
        log.write(&IndexEntry::set(b"whole".to_vec(), 0, 1), None).unwrap();
        let valid = log.len().unwrap();
        // Half of a second entry.
        let partial = IndexEntry::set(b"torn".to_vec(), 1, 1).encode().unwrap();
        write_at_pos(&log.file, &partial[..10], None).unwrap();

        let entries = collect(&log);
        assert_eq!(entries.len(), 1);
        assert_eq!(log.len().unwrap(), valid);
    }

    #[test]
    fn test_empty_log_replays_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_temp(&dir);
        assert!(log.is_empty().unwrap());
        assert!(collect(&log).is_empty());
    }
}
