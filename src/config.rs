//! KEEL - Engine Configuration
//! Defines tunable parameters for the storage engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

/// How a store serves reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Only locations are kept in memory; every read hits the value log.
    Disk,
    /// Values are loaded into memory during replay and kept there.
    /// With an empty store name no files are created at all.
    Preload,
}

/// Per-store settings, the subset of [`Config`] a single store needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Permission bits for created files.
    pub file_mode: u32,
    /// Permission bits for created directories.
    pub dir_mode: u32,
    pub store_mode: StoreMode,
    /// Whether to fsync after every write.
    pub sync_writes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            file_mode: 0o644,
            dir_mode: 0o755,
            store_mode: StoreMode::Disk,
            sync_writes: false,
        }
    }
}

/// Configuration for the Keel storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for all data files (stores, journal).
    pub data_dir: PathBuf,

    /// Permission bits for created files.
    pub file_mode: u32,

    /// Permission bits for created directories.
    pub dir_mode: u32,

    pub store_mode: StoreMode,

    /// Interval between background sweeps. Zero disables the sweepers;
    /// lazy expiry on access still applies.
    pub eviction_interval: Duration,

    /// When false nothing touches the disk.
    pub persist: bool,

    /// Whether to sync writes to disk immediately (fsync).
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            file_mode: 0o644,
            dir_mode: 0o755,
            store_mode: StoreMode::Disk,
            eviction_interval: Duration::from_secs(1),
            persist: true,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// A configuration that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            data_dir: PathBuf::new(),
            store_mode: StoreMode::Preload,
            persist: false,
            sync_writes: false,
            ..Default::default()
        }
    }

    /// Set the background eviction interval. `Duration::ZERO` disables it.
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_store_mode(mut self, mode: StoreMode) -> Self {
        self.store_mode = mode;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Set file and directory permission bits.
    pub fn with_modes(mut self, file_mode: u32, dir_mode: u32) -> Self {
        self.file_mode = file_mode;
        self.dir_mode = dir_mode;
        self
    }

    /// The per-store subset of this configuration.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            file_mode: self.file_mode,
            dir_mode: self.dir_mode,
            store_mode: self.store_mode,
            sync_writes: self.sync_writes,
        }
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.file_mode == 0 {
            return Err(KeelError::Config("file_mode must not be zero".into()));
        }
        if self.persist && self.data_dir.as_os_str().is_empty() {
            return Err(KeelError::Config(
                "data_dir is required when persist is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        create_dir_all(&self.data_dir, self.dir_mode)
    }
}

/// Create `path` and its parents with the given permission bits.
pub(crate) fn create_dir_all(path: &std::path::Path, dir_mode: u32) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(dir_mode);
    }
    #[cfg(not(unix))]
    let _ = dir_mode;
    builder.create(path)
}
