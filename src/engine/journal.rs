//! KEEL - Mutation Journal
//! Durable log of typed mutations (hash and set changes, TTLs, removals).
//! Every mutation is appended before the in-memory state changes.
//!
//! ## Binary Format (per frame)
//! ```text
//! [header crc: 4 bytes (LE)][record: 18-byte header + key + value][crc: 4 bytes (LE)]
//! ```
//! The header CRC covers the 18-byte record header, so its size fields can be
//! trusted before the rest of the frame is read. The trailing CRC covers the
//! encoded record.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::record::{Record, RECORD_HEADER_SIZE};
use super::value_log::open_rw;
use crate::error::{KeelError, Result};

const CRC_SIZE: usize = 4;
/// Header CRC plus record header.
const FRAME_HEAD_SIZE: usize = CRC_SIZE + RECORD_HEADER_SIZE;

/// Append-only journal of [`Record`]s.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
    sync_writes: bool,
}

impl Journal {
    /// Open or create the journal at `path` for appending.
    pub fn open(path: PathBuf, file_mode: u32, sync_writes: bool) -> Result<Self> {
        let file = open_rw(&path, file_mode)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn frame(record: &Record) -> Result<Vec<u8>> {
        let body = record.encode()?;
        let mut buf = Vec::with_capacity(body.len() + 2 * CRC_SIZE);
        buf.extend_from_slice(&crc32fast::hash(&body[..RECORD_HEADER_SIZE]).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(buf)
    }

    /// Append one record and flush it to disk.
    pub fn append(&self, record: &Record) -> Result<()> {
        let frame = Self::frame(record)?;
        let mut file = self.file.lock();
        let end = file.metadata()?.len();
        file.seek(SeekFrom::Start(end))?;
        file.write_all(&frame)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Read every record in order.
    ///
    /// A frame cut short by a crash ends the replay and is truncated away.
    /// A header or record whose checksum does not match fails with
    /// `Corruption` and leaves the file untouched.
    pub fn recover(&self) -> Result<Vec<Record>> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(&*file);
        reader.seek(SeekFrom::Start(0))?;

        let mut records = Vec::new();
        let mut valid_len: u64 = 0;
        loop {
            let mut head = [0u8; FRAME_HEAD_SIZE];
            match reader.read_exact(&mut head) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut header = [0u8; RECORD_HEADER_SIZE];
            header.copy_from_slice(&head[CRC_SIZE..]);
            if crc32fast::hash(&header) != read_crc(&head[..CRC_SIZE]) {
                return Err(self.corruption("header", valid_len));
            }

            let (key_size, value_size) = Record::peek_sizes(&header);
            let body_len = RECORD_HEADER_SIZE + key_size + value_size;
            let frame_len = (CRC_SIZE + body_len + CRC_SIZE) as u64;
            if frame_len > len - valid_len {
                break;
            }
            let mut body = vec![0u8; body_len + CRC_SIZE];
            body[..RECORD_HEADER_SIZE].copy_from_slice(&header);
            match reader.read_exact(&mut body[RECORD_HEADER_SIZE..]) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            if crc32fast::hash(&body[..body_len]) != read_crc(&body[body_len..]) {
                return Err(self.corruption("record", valid_len));
            }
            records.push(Record::decode(&body[..body_len]));
            valid_len += frame_len;
        }
        drop(reader);

        if len > valid_len {
            log::warn!(
                "Journal {:?} ends with a torn frame, truncating {} bytes",
                self.path,
                len - valid_len
            );
            file.set_len(valid_len)?;
        }
        Ok(records)
    }

    fn corruption(&self, part: &str, offset: u64) -> KeelError {
        KeelError::Corruption(format!(
            "journal {:?} {} checksum mismatch at offset {}",
            self.path, part, offset
        ))
    }

    /// Flush the journal to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

fn read_crc(bytes: &[u8]) -> u32 {
    let mut crc = [0u8; CRC_SIZE];
    crc.copy_from_slice(bytes);
    u32::from_le_bytes(crc)
}
