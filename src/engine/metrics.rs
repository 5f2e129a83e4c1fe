//! KEEL - Engine Metrics
//! Atomic counters for tracking store and eviction activity
//! in a lock-free, thread-safe manner using `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Atomic operation counters.
///
/// All counters use `Ordering::Relaxed`; they are for observation only.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Total number of `set` operations.
    pub sets: AtomicU64,
    /// Total number of `get` operations.
    pub gets: AtomicU64,
    /// Total number of `delete` operations that removed a key.
    pub deletes: AtomicU64,
    /// Overwrites that reused the old value slot.
    pub in_place_writes: AtomicU64,
    /// Overwrites that moved the value to the end of the value log.
    pub relocations: AtomicU64,
    /// Total bytes written (keys + values).
    pub bytes_written: AtomicU64,
    /// Total bytes read (values returned by get).
    pub bytes_read: AtomicU64,
    /// Index or journal entries applied during replay.
    pub replayed_entries: AtomicU64,
    /// Keys removed by an expiry check on access.
    pub lazy_evictions: AtomicU64,
    /// Keys removed by background or manual sweeps.
    pub swept_keys: AtomicU64,
    started: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            sets: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            in_place_writes: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            replayed_entries: AtomicU64::new(0),
            lazy_evictions: AtomicU64::new(0),
            swept_keys: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_set(&self, key_size: usize, value_size: usize) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add((key_size + value_size) as u64, Ordering::Relaxed);
    }

    /// Record a get; `value_size` is `None` on a miss.
    pub fn record_get(&self, value_size: Option<usize>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(size) = value_size {
            self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_place(&self) {
        self.in_place_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relocation(&self) {
        self.relocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self, entries: usize) {
        self.replayed_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_lazy_eviction(&self) {
        self.lazy_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, keys: usize) {
        self.swept_keys.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Sets + gets + deletes.
    pub fn total_ops(&self) -> u64 {
        let s = self.snapshot();
        s.sets + s.gets + s.deletes
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            sets: load(&self.sets),
            gets: load(&self.gets),
            deletes: load(&self.deletes),
            in_place_writes: load(&self.in_place_writes),
            relocations: load(&self.relocations),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            replayed_entries: load(&self.replayed_entries),
            lazy_evictions: load(&self.lazy_evictions),
            swept_keys: load(&self.swept_keys),
        }
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        let s = self.snapshot();
        format!(
            "\n═══ KEEL Engine Metrics ═══\n\
             Operations: {} sets, {} gets, {} deletes\n\
             Value log:  {} in place, {} relocated\n\
             I/O:        {} bytes written, {} bytes read\n\
             Replay:     {} entries\n\
             Expiry:     {} lazy, {} swept\n\
             Uptime: {:.2}s",
            s.sets,
            s.gets,
            s.deletes,
            s.in_place_writes,
            s.relocations,
            s.bytes_written,
            s.bytes_read,
            s.replayed_entries,
            s.lazy_evictions,
            s.swept_keys,
            self.uptime_secs(),
        )
    }
}

/// Plain copy of [`EngineMetrics`] counters, for hosts that export them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sets: u64,
    pub gets: u64,
    pub deletes: u64,
    pub in_place_writes: u64,
    pub relocations: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub replayed_entries: u64,
    pub lazy_evictions: u64,
    pub swept_keys: u64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
