//! Bucket files on disk.
//!
//! A bucket is a plain append log of framed entries; there is no index and
//! no tombstone. Lookups scan the whole bucket, and updates and deletions
//! rewrite it. That keeps every operation O(bucket size), which is fine as
//! long as fan-out keeps buckets small, and it keeps corruption handling
//! trivial: a malformed bucket is deleted as a whole.
//!
//! ## Locking
//!
//! Every operation holds the bucket's lock from [`LockManager`] for its
//! full duration. The lock lives on a sidecar `<bucket>.lock` file, so a
//! rewrite that replaces the bucket file never invalidates a held lock.
//!
//! ## Failure handling
//!
//! Reads never fail. Corruption (bad framing, bad checksum, a record cut
//! short) deletes the bucket and reads as empty; other I/O errors are logged
//! and also read as empty. A well-framed record that does not decode as the
//! store's key/value types is a usage error, not corruption: the bucket is
//! kept and writes to it fail with [`Error::Serialization`].

pub mod codec;
pub mod reader;
pub mod record;
pub mod writer;

pub use codec::{BincodeCodec, JsonCodec, RecordCodec};
pub use reader::BucketReader;
pub use record::Record;
pub use writer::BucketWriter;

use crate::addressing::{bucket_filename, bucket_id, parse_bucket_filename, StableHash};
use crate::error::{Error, Result};
use crate::lock::{LockManager, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One key/value pair as stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheEntry<K, V> {
    /// The key
    pub key: K,
    /// The value
    pub value: V,
}

#[cfg(test)]
impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

/// Called with the id of a bucket just deleted as corrupt, while its lock
/// is still held.
pub type CorruptionHook = Box<dyn Fn(i64) + Send + Sync>;

/// Whole-bucket operations over one cache directory.
pub struct BlockStore<K, V, C> {
    dir: PathBuf,
    codec: C,
    max_buckets: Option<u32>,
    locks: Arc<LockManager>,
    retry: RetryPolicy,
    /// Buckets deleted because they were malformed
    corruptions: AtomicU64,
    on_corruption: Option<CorruptionHook>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> BlockStore<K, V, C>
where
    K: StableHash + PartialEq,
    C: RecordCodec<K, V>,
{
    /// Create a store over an existing directory.
    pub fn new(
        dir: impl Into<PathBuf>,
        codec: C,
        max_buckets: Option<u32>,
        locks: Arc<LockManager>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dir: dir.into(),
            codec,
            max_buckets,
            locks,
            retry,
            corruptions: AtomicU64::new(0),
            on_corruption: None,
            _marker: PhantomData,
        }
    }

    /// Run `hook` whenever a corrupt bucket is deleted.
    pub fn on_corruption(mut self, hook: impl Fn(i64) + Send + Sync + 'static) -> Self {
        self.on_corruption = Some(Box::new(hook));
        self
    }

    #[cfg(test)]
    pub(crate) fn codec(&self) -> &C {
        &self.codec
    }

    /// The lock manager guarding the buckets
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Number of malformed buckets deleted so far
    pub fn corruptions(&self) -> u64 {
        self.corruptions.load(Ordering::Relaxed)
    }

    /// Path of the bucket holding `key`
    pub fn bucket_path_for(&self, key: &K) -> PathBuf {
        self.bucket_path(bucket_id(key.stable_hash(), self.max_buckets))
    }

    /// Path of bucket `id`
    pub fn bucket_path(&self, id: i64) -> PathBuf {
        self.dir.join(bucket_filename(id, self.codec.extension()))
    }

    /// Cheap existence probe, no lock taken.
    pub fn exists(&self, bucket: &Path) -> bool {
        bucket.is_file()
    }

    /// Every bucket file in the directory, ordered by bucket id.
    ///
    /// A directory that cannot be listed is logged and reads as empty.
    pub fn bucket_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to list cache directory {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };

        let extension = self.codec.extension();
        let mut buckets: Vec<(i64, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let id = parse_bucket_filename(name.to_str()?, extension)?;
                Some((id, entry.path()))
            })
            .collect();
        buckets.sort_by_key(|(id, _)| *id);
        buckets.into_iter().map(|(_, path)| path).collect()
    }

    /// Run `f` holding the lock of `bucket`. Reentrant on the same thread.
    pub fn with_bucket_lock<T>(&self, bucket: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.locks.with_lock(&lock_path(bucket), &self.retry, f)
    }

    /// Read every entry of `bucket` in write order.
    ///
    /// Never fails: a missing bucket, a corrupt bucket (which is deleted) and
    /// an unreadable bucket all read as empty. A bucket whose records do not
    /// decode as `K`/`V` is left on disk and also reads as empty.
    pub fn read_full(&self, bucket: &Path) -> Vec<CacheEntry<K, V>> {
        match self.try_read_full(bucket) {
            Ok(entries) => entries,
            Err(e @ Error::Serialization(_)) => {
                log::error!("Bucket {:?} holds entries of another type: {}", bucket, e);
                Vec::new()
            }
            Err(e) => {
                log::warn!("Failed to read bucket {:?}: {}", bucket, e);
                Vec::new()
            }
        }
    }

    /// Like [`read_full`](Self::read_full), but reports I/O and decode
    /// failures. Corruption is still recovered by deleting the bucket.
    pub fn try_read_full(&self, bucket: &Path) -> Result<Vec<CacheEntry<K, V>>> {
        self.with_bucket_lock(bucket, || self.read_locked(bucket))
    }

    /// Append one entry, creating the bucket if needed.
    pub fn append_one(&self, bucket: &Path, key: &K, value: &V) -> Result<()> {
        self.with_bucket_lock(bucket, || {
            let mut writer = BucketWriter::append(bucket, &self.codec)?;
            writer.write(key, value)?;
            writer.flush()
        })
    }

    /// Replace (`Some`) or delete (`None`) the record for `key`, returning
    /// the value it had.
    ///
    /// The bucket is rewritten as a whole with every other record passed
    /// through unchanged. Replacing a key the bucket doesn't hold appends it.
    /// Duplicate records for `key` collapse into one.
    pub fn update_or_delete(&self, bucket: &Path, key: &K, value: Option<&V>) -> Result<Option<V>> {
        self.with_bucket_lock(bucket, || {
            let existing = self.read_locked(bucket)?;
            if existing.is_empty() && value.is_none() {
                return Ok(None);
            }

            let mut previous = None;
            let tmp = temp_path(bucket);
            let written = {
                let mut writer = BucketWriter::create(&tmp, &self.codec)?;
                let mut replaced = false;
                for entry in existing {
                    if entry.key != *key {
                        writer.write(&entry.key, &entry.value)?;
                        continue;
                    }
                    if let (Some(value), false) = (value, replaced) {
                        writer.write(key, value)?;
                        replaced = true;
                    }
                    previous = Some(entry.value);
                }
                if let (Some(value), false) = (value, replaced) {
                    writer.write(key, value)?;
                }
                writer.sync()?;
                writer.records()
            };

            self.install(bucket, &tmp, written)?;
            log::debug!("Rewrote bucket {:?} with {} records", bucket, written);
            Ok(previous)
        })
    }

    /// Replace the whole content of `bucket` with `entries`.
    ///
    /// An empty `entries` removes the bucket.
    pub fn rewrite<I>(&self, bucket: &Path, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.with_bucket_lock(bucket, || {
            let tmp = temp_path(bucket);
            let written = {
                let mut writer = BucketWriter::create(&tmp, &self.codec)?;
                for (key, value) in entries {
                    writer.write(&key, &value)?;
                }
                writer.sync()?;
                writer.records()
            };
            self.install(bucket, &tmp, written)?;
            Ok(written)
        })
    }

    /// Remove a bucket file. Removing a missing bucket is not an error.
    pub fn delete_bucket(&self, bucket: &Path) -> Result<()> {
        self.with_bucket_lock(bucket, || remove_if_exists(bucket))
    }

    /// Read with the bucket lock already held.
    fn read_locked(&self, bucket: &Path) -> Result<Vec<CacheEntry<K, V>>> {
        let mut reader = match BucketReader::new(bucket, &self.codec) {
            Ok(reader) => reader,
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        match reader.read_all() {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_corruption() => {
                log::warn!(
                    "Corrupt bucket {:?} at offset {}: {}, deleting it",
                    bucket,
                    reader.position(),
                    e
                );
                drop(reader);
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                remove_if_exists(bucket)?;
                if let (Some(hook), Some(id)) = (&self.on_corruption, self.bucket_id_of(bucket)) {
                    hook(id);
                }
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn bucket_id_of(&self, bucket: &Path) -> Option<i64> {
        parse_bucket_filename(bucket.file_name()?.to_str()?, self.codec.extension())
    }

    /// Move a finished temp file over `bucket`, or drop both if it is empty.
    fn install(&self, bucket: &Path, tmp: &Path, records: usize) -> Result<()> {
        if records == 0 {
            remove_if_exists(tmp)?;
            return remove_if_exists(bucket);
        }
        if let Err(e) = fs::rename(tmp, bucket) {
            let _ = fs::remove_file(tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Sidecar lock file of a bucket
pub fn lock_path(bucket: &Path) -> PathBuf {
    with_suffix(bucket, ".lock")
}

fn temp_path(bucket: &Path) -> PathBuf {
    with_suffix(bucket, ".tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
