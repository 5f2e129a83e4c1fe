//! KEEL - Value Log
//! Append-only file of raw value bytes, addressed by offset and length.
//! The file has no header; offsets only mean something through the
//! paired index log.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{KeelError, Result};

/// Open `path` for reading and writing, creating it with `file_mode`.
pub(crate) fn open_rw(path: &Path, file_mode: u32) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(file_mode);
    }
    #[cfg(not(unix))]
    let _ = file_mode;
    Ok(options.open(path)?)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// Write `buf` at `pos`, or at end-of-file when `pos` is `None`.
/// Returns the offset written at. Assumes a single writer per file.
pub(crate) fn write_at_pos(file: &File, buf: &[u8], pos: Option<u64>) -> Result<u64> {
    let offset = match pos {
        Some(offset) => offset,
        None => file.metadata()?.len(),
    };
    write_all_at(file, buf, offset)?;
    Ok(offset)
}

/// Convert a file offset into the 32-bit on-disk field.
pub(crate) fn to_u32(offset: u64, what: &str) -> Result<u32> {
    u32::try_from(offset).map_err(|_| KeelError::Capacity(format!("{} {} exceeds 4 GiB", what, offset)))
}

/// Raw value storage for one store.
pub struct ValueLog {
    path: PathBuf,
    file: File,
    sync_writes: bool,
}

impl ValueLog {
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

    /// Write `value` at `pos` (`None` appends). Returns the offset written at.
    pub fn write(&self, value: &[u8], pos: Option<u64>) -> Result<u32> {
        let offset = write_at_pos(&self.file, value, pos)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        to_u32(offset, "value offset")
    }

    /// Read `size` bytes at `seek`.
    pub fn read(&self, seek: u32, size: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        read_exact_at(&self.file, &mut buf, seek as u64)?;
        Ok(buf)
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
