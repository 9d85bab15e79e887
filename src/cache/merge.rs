//! Bulk merge and compaction.
//!
//! A merge folds the entries of several caches into one destination and
//! rewrites every destination bucket from scratch.
//!
//! Precedence is last-write-wins in read order: the destination's own
//! entries are read first, then each constituent in slice order. A
//! constituent therefore always overrides a destination entry for the same
//! key, and a later constituent overrides an earlier one.
//!
//! The rewrite deletes every existing destination bucket before writing the
//! merged ones. It is not crash safe: dying in between can leave the
//! destination empty.

use super::{CacheKey, CacheValue, FileBackedCache};
use crate::error::Result;
use crate::store::RecordCodec;
use std::collections::HashMap;
use std::path::PathBuf;

impl<K: CacheKey, V: CacheValue, C: RecordCodec<K, V> + 'static> FileBackedCache<K, V, C> {
    /// Merges every entry of `constituents` into `destination`.
    ///
    /// Each constituent's memory is cleared once it has been read, to bound
    /// peak memory. Any bucket that cannot be read, other than a corrupt one,
    /// aborts the merge before the destination is touched. Constituents' disk contents are left alone. The
    /// destination's memory is cleared before the rewrite.
    pub fn merge(destination: &Self, constituents: &[&Self]) -> Result<()> {
        let mut merged: HashMap<PathBuf, HashMap<K, V>> = HashMap::new();

        let mut absorb = |source: &Self| -> Result<usize> {
            let mut count = 0usize;
            for bucket in source.store.bucket_files() {
                for entry in source.store.try_read_full(&bucket)? {
                    let target = destination.store.bucket_path_for(&entry.key);
                    merged.entry(target).or_default().insert(entry.key, entry.value);
                    count += 1;
                }
            }
            Ok(count)
        };

        let own = absorb(destination)?;
        log::debug!("Merge read {} entries from destination {:?}", own, destination.path());
        for &constituent in constituents {
            let read = absorb(constituent)?;
            constituent.clear();
            log::debug!("Merge read {} entries from {:?}", read, constituent.path());
        }

        let existing = destination.store.bucket_files();
        destination.clear();
        for bucket in &existing {
            destination.store.delete_bucket(bucket)?;
        }

        let mut written = 0;
        let buckets = merged.len();
        for (bucket, entries) in merged {
            written += destination.store.rewrite(&bucket, entries)?;
        }

        log::info!(
            "Merged {} caches into {:?}: {} entries in {} buckets (replaced {} buckets)",
            constituents.len(),
            destination.path(),
            written,
            buckets,
            existing.len()
        );
        Ok(())
    }

    /// Rewrites every bucket, collapsing duplicate records and dropping
    /// corrupt buckets.
    pub fn compact(&self) -> Result<()> {
        Self::merge(self, &[])
    }
}
