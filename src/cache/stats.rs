//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory
    pub memory_hits: u64,
    /// Lookups that missed memory
    pub misses: u64,
    /// Full bucket reads performed to answer lookups
    pub disk_reads: u64,
    /// Records appended or buckets rewritten by `put`/`remove`
    pub disk_writes: u64,
    /// Corrupt buckets deleted
    pub corruptions: u64,
    /// Values released from memory for capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the memory hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.memory_hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.memory_hits as f64 / lookups as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    memory_hits: AtomicU64,
    misses: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disk_read(&self) {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, corruptions: u64, evictions: u64) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            corruptions,
            evictions,
        }
    }
}
