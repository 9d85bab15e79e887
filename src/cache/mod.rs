//! The file-backed cache.
//!
//! [`FileBackedCache`] is a map whose every entry lives on disk in a bucket
//! file and whose recently used values are also kept in memory. Lookups hit
//! memory first and fall back to reading the key's bucket; writes go to disk
//! synchronously so memory and disk only differ by what memory has dropped.
//!
//! Whole-map queries (`size`, `keys`, `values`, `entries`, iteration) read
//! every bucket and cost O(total on-disk size). Use
//! [`FileBackedCache::size_in_memory`] for a cheap count.
//!
//! Values come back as `Arc<V>`: shared, read-only views. A cached value
//! cannot be mutated in place, so memory cannot drift from disk behind the
//! cache's back. To change a value, `put` a new one.

mod merge;
mod stats;

pub use stats::CacheStats;

use crate::addressing::{bucket_id, StableHash};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::index::{MemoryIndex, Pass, Reaper};
use crate::lock::{LockManager, RetryPolicy};
use crate::store::{BincodeCodec, BlockStore, CacheEntry, RecordCodec};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stats::StatsRecorder;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bounds a cache key must satisfy.
pub trait CacheKey:
    StableHash + Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: StableHash + Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds a cached value must satisfy.
pub trait CacheValue: PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A hybrid memory/disk key-value cache over one directory.
///
/// # Thread Safety
///
/// `FileBackedCache` is safe to share across threads using `Arc`. Operations
/// on the same bucket serialize on the bucket lock; operations on different
/// buckets run in parallel. Other processes using the same directory are
/// kept out of a bucket by an advisory lock on a best-effort basis.
pub struct FileBackedCache<K, V, C = BincodeCodec> {
    path: PathBuf,
    options: Options,
    store: BlockStore<K, V, C>,
    index: Arc<MemoryIndex<K, V>>,
    stats: StatsRecorder,
    reaper: Mutex<Option<Reaper>>,
}

impl<K: CacheKey, V: CacheValue> FileBackedCache<K, V, BincodeCodec> {
    /// Opens a cache in `path` using the default binary codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing (and `create_if_missing`
    /// is off), is not a directory, or is not writable, or if the options
    /// are invalid.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use bucketcache::{FileBackedCache, Options};
    ///
    /// # fn main() -> Result<(), bucketcache::Error> {
    /// let cache: FileBackedCache<String, String> =
    ///     FileBackedCache::open("./cache", Options::default().max_buckets(64))?;
    /// cache.put("key".to_string(), "value".to_string())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_with_codec(path, options, BincodeCodec)
    }
}

impl<K: CacheKey, V: CacheValue, C: RecordCodec<K, V> + 'static> FileBackedCache<K, V, C> {
    /// Opens a cache in `path` storing entries with `codec`.
    pub fn open_with_codec<P: AsRef<Path>>(path: P, options: Options, codec: C) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        options.validate()?;

        if !path.exists() {
            if options.create_if_missing {
                fs::create_dir_all(&path)?;
            } else {
                return Err(Error::invalid_argument(format!(
                    "Cache directory does not exist: {:?}",
                    path
                )));
            }
        } else if !path.is_dir() {
            return Err(Error::invalid_argument(format!("Not a directory: {:?}", path)));
        }
        check_writable(&path)?;

        let retry = RetryPolicy {
            attempts: options.lock_retry_attempts,
            interval: options.lock_retry_interval,
        };
        let (index, notifications) = MemoryIndex::<K, V>::new(options.memory_capacity);
        let index = Arc::new(index);

        // A bucket deleted as corrupt takes its keys' memory entries with it.
        let max_buckets = options.max_buckets;
        let purge_index = Arc::downgrade(&index);
        let store = BlockStore::new(&path, codec, max_buckets, LockManager::global(), retry)
            .on_corruption(move |bucket| {
                let Some(index) = purge_index.upgrade() else {
                    return;
                };
                let purged =
                    index.remove_where(|key| bucket_id(key.stable_hash(), max_buckets) == bucket);
                log::debug!("Dropped {} memory entries of corrupt bucket {}", purged, bucket);
            });

        let weak_index = Arc::downgrade(&index);
        let reaper = Reaper::spawn(
            "bucketcache-reaper",
            notifications,
            options.reaper_interval,
            move || {
                let Some(index) = weak_index.upgrade() else {
                    return Ok(Pass::Stop);
                };
                let pruned = index.prune();
                if pruned > 0 {
                    log::debug!("Reaper pruned {} reclaimed entries", pruned);
                }
                Ok(Pass::Continue)
            },
        )?;

        log::info!("Opened cache at {:?}", path);

        Ok(Self {
            path,
            options,
            store,
            index,
            stats: StatsRecorder::default(),
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Retrieves the value for `key`.
    ///
    /// Memory is checked first. On a miss the key's bucket is read, and every
    /// entry found in it is indexed, not just the one asked for.
    ///
    /// Never fails: unreadable or corrupt buckets read as "not found".
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if let Some(value) = self.index.get(key) {
            self.stats.hit();
            return Some(value);
        }
        self.stats.miss();

        let bucket = self.store.bucket_path_for(key);
        if !self.store.exists(&bucket) {
            return None;
        }

        match self.store.with_bucket_lock(&bucket, || self.load_bucket(&bucket, key)) {
            Ok(value) => value,
            Err(e @ Error::Serialization(_)) => {
                log::error!("Bucket {:?} holds entries of another type: {}", bucket, e);
                None
            }
            Err(e) => {
                log::warn!("Failed to read bucket {:?}: {}", bucket, e);
                None
            }
        }
    }

    /// Whether `key` has a value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Whether any key maps to `value`. Reads every bucket.
    pub fn contains_value(&self, value: &V) -> bool {
        self.store
            .bucket_files()
            .iter()
            .any(|bucket| self.store.read_full(bucket).iter().any(|e| e.value == *value))
    }

    /// Associates `value` with `key`, returning the previous value.
    ///
    /// A new key is appended to its bucket; a changed value rewrites the
    /// bucket; an unchanged value touches only memory.
    pub fn put(&self, key: K, value: V) -> Result<Option<Arc<V>>> {
        let bucket = self.store.bucket_path_for(&key);
        self.store.with_bucket_lock(&bucket, || {
            let previous = match self.index.get(&key) {
                Some(previous) => Some(previous),
                None if self.store.exists(&bucket) => self.load_bucket(&bucket, &key)?,
                None => None,
            };

            match &previous {
                None => {
                    self.store.append_one(&bucket, &key, &value)?;
                    self.stats.disk_write();
                }
                Some(old) if **old != value => {
                    self.store.update_or_delete(&bucket, &key, Some(&value))?;
                    self.stats.disk_write();
                }
                Some(_) => {}
            }

            self.index.insert(key, Arc::new(value));
            Ok(previous)
        })
    }

    /// Puts every pair of `entries`.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Removes `key` from memory and disk, returning its value.
    ///
    /// The record is physically removed from its bucket.
    pub fn remove(&self, key: &K) -> Result<Option<Arc<V>>> {
        let bucket = self.store.bucket_path_for(key);
        self.store.with_bucket_lock(&bucket, || {
            let in_memory = self.index.remove(key);
            if !self.store.exists(&bucket) {
                return Ok(in_memory);
            }
            let on_disk = self.store.update_or_delete(&bucket, key, None)?;
            if on_disk.is_some() {
                self.stats.disk_write();
            }
            Ok(in_memory.or_else(|| on_disk.map(Arc::new)))
        })
    }

    /// Number of entries on disk. Reads every bucket.
    pub fn size(&self) -> usize {
        self.store.bucket_files().iter().map(|bucket| self.store.read_full(bucket).len()).sum()
    }

    /// Whether the cache holds no entries. Reads buckets until one is non-empty.
    pub fn is_empty(&self) -> bool {
        self.store.bucket_files().iter().all(|bucket| self.store.read_full(bucket).is_empty())
    }

    /// All keys. Reads every bucket.
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// All values. Reads every bucket.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.iter().map(|(_, value)| value).collect()
    }

    /// All entries. Reads every bucket.
    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.iter().collect()
    }

    /// Iterates over every entry, reading one bucket at a time.
    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter {
            store: &self.store,
            buckets: self.store.bucket_files().into_iter(),
            current: Vec::new().into_iter(),
        }
    }

    /// Drops every value from memory. Disk is untouched.
    pub fn clear(&self) {
        self.index.clear();
    }

    /// Number of live values in memory. Cheap.
    pub fn size_in_memory(&self) -> usize {
        self.index.len()
    }

    /// Drops `key` from memory only, returning its value if it was live.
    pub fn remove_from_memory(&self, key: &K) -> Option<Arc<V>> {
        self.index.remove(key)
    }

    /// Number of bucket locks currently held by this process.
    pub fn locks_held(&self) -> usize {
        self.store.locks().locks_held()
    }

    /// Snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.store.corruptions(), self.index.evictions())
    }

    /// The cache directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The options the cache was opened with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stops the background reaper and waits for it.
    ///
    /// Returns [`Error::ReaperTerminated`] if it had died abnormally. Memory
    /// handles are no longer pruned afterwards; the cache otherwise keeps
    /// working.
    pub fn shutdown_reaper(&self) -> Result<()> {
        match self.reaper.lock().take() {
            Some(reaper) => reaper.wait(),
            None => Ok(()),
        }
    }

    /// Index every entry of `bucket`, returning the value for `key`.
    /// The bucket lock must be held.
    fn load_bucket(&self, bucket: &Path, key: &K) -> Result<Option<Arc<V>>> {
        self.stats.disk_read();
        let mut found = None;
        for CacheEntry { key: entry_key, value } in self.store.try_read_full(bucket)? {
            let matches = entry_key == *key;
            let value = self.index.get_or_insert(entry_key, Arc::new(value));
            if matches {
                found = Some(value);
            }
        }
        Ok(found)
    }
}

/// Iterator over every entry of a cache, see [`FileBackedCache::iter`].
pub struct Iter<'a, K, V, C> {
    store: &'a BlockStore<K, V, C>,
    buckets: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<CacheEntry<K, V>>,
}

impl<K: CacheKey, V: CacheValue, C: RecordCodec<K, V>> Iterator for Iter<'_, K, V, C> {
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some((entry.key, Arc::new(entry.value)));
            }
            let bucket = self.buckets.next()?;
            self.current = self.store.read_full(&bucket).into_iter();
        }
    }
}

impl<'a, K: CacheKey, V: CacheValue, C: RecordCodec<K, V> + 'static> IntoIterator
    for &'a FileBackedCache<K, V, C>
{
    type Item = (K, Arc<V>);
    type IntoIter = Iter<'a, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Fail fast on a directory we cannot write to.
fn check_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".write-probe-{}", std::process::id()));
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| Error::invalid_argument(format!("Cache directory {:?} is not writable: {}", dir, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonCodec;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FileBackedCache<String, String> {
        FileBackedCache::open(dir.path(), Options::default().max_buckets(8)).unwrap()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache");
        let cache: FileBackedCache<String, String> =
            FileBackedCache::open(&path, Options::default()).unwrap();
        assert!(path.is_dir());
        assert_eq!(cache.path(), path.as_path());
    }

    #[test]
    fn test_open_missing_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let result: Result<FileBackedCache<String, String>> = FileBackedCache::open(
            dir.path().join("missing"),
            Options::default().create_if_missing(false),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_open_on_file_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        let result: Result<FileBackedCache<String, String>> =
            FileBackedCache::open(&file, Options::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_open_rejects_invalid_options() {
        let dir = TempDir::new().unwrap();
        let result: Result<FileBackedCache<String, String>> =
            FileBackedCache::open(dir.path(), Options::default().max_buckets(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert_eq!(cache.put(s("key1"), s("value1")).unwrap(), None);
        assert_eq!(cache.get(&s("key1")).as_deref(), Some(&s("value1")));
        assert_eq!(cache.get(&s("key2")), None);
        assert!(cache.contains_key(&s("key1")));
        assert!(!cache.contains_key(&s("key2")));
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("a"), s("v")).unwrap();
        cache.clear();
        assert_eq!(cache.size_in_memory(), 0);
        assert_eq!(cache.get(&s("a")).as_deref(), Some(&s("v")));
        assert_eq!(cache.size_in_memory(), 1);
    }

    #[test]
    fn test_overwrite_returns_previous() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("k"), s("v1")).unwrap();
        let previous = cache.put(s("k"), s("v2")).unwrap();
        assert_eq!(previous.as_deref(), Some(&s("v1")));
        assert_eq!(cache.get(&s("k")).as_deref(), Some(&s("v2")));

        cache.clear();
        let previous = cache.put(s("k"), s("v3")).unwrap();
        assert_eq!(previous.as_deref(), Some(&s("v2")));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_unchanged_put_skips_disk() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("k"), s("v")).unwrap();
        cache.put(s("k"), s("v")).unwrap();
        assert_eq!(cache.stats().disk_writes, 1);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("k"), s("v")).unwrap();
        assert_eq!(cache.remove(&s("k")).unwrap().as_deref(), Some(&s("v")));
        assert_eq!(cache.get(&s("k")), None);
        assert_eq!(cache.remove(&s("k")).unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_after_clear_reads_disk_value() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("k"), s("v")).unwrap();
        cache.clear();
        assert_eq!(cache.remove(&s("k")).unwrap().as_deref(), Some(&s("v")));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_bucket_read_populates_neighbours() {
        let dir = TempDir::new().unwrap();
        let cache: FileBackedCache<i32, String> =
            FileBackedCache::open(dir.path(), Options::default().max_buckets(4)).unwrap();

        cache.put(1, s("one")).unwrap();
        cache.put(5, s("five")).unwrap();
        cache.put(2, s("two")).unwrap();
        cache.clear();

        assert_eq!(cache.get(&1).as_deref(), Some(&s("one")));
        // 5 shares bucket 1, 2 does not
        assert_eq!(cache.size_in_memory(), 2);
        assert!(cache.remove_from_memory(&5).is_some());
        assert!(cache.remove_from_memory(&2).is_none());
    }

    #[test]
    fn test_whole_map_queries() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert!(cache.is_empty());

        cache.put_all((0..20).map(|i| (format!("k{}", i), format!("v{}", i)))).unwrap();
        assert_eq!(cache.size(), 20);
        assert!(!cache.is_empty());

        let mut keys = cache.keys();
        keys.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("k{}", i)).collect();
        expected.sort();
        assert_eq!(keys, expected);

        assert_eq!(cache.values().len(), 20);
        assert!(cache.contains_value(&s("v7")));
        assert!(!cache.contains_value(&s("v70")));

        let entries = cache.entries();
        assert!(entries.iter().all(|(k, v)| k[1..] == v[1..]));
        assert_eq!((&cache).into_iter().count(), 20);
    }

    #[test]
    fn test_json_codec_cache() {
        let dir = TempDir::new().unwrap();
        let cache: FileBackedCache<String, u64, JsonCodec> =
            FileBackedCache::open_with_codec(dir.path(), Options::default().max_buckets(2), JsonCodec)
                .unwrap();
        cache.put(s("answer"), 42).unwrap();
        cache.clear();
        assert_eq!(cache.get(&s("answer")).as_deref(), Some(&42));

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jcache"))
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_memory_capacity_bounds_retention() {
        let dir = TempDir::new().unwrap();
        let cache: FileBackedCache<u32, u32> = FileBackedCache::open(
            dir.path(),
            Options::default().memory_capacity(10).reaper_interval(Duration::from_millis(1)),
        )
        .unwrap();

        for i in 0..100 {
            cache.put(i, i * 2).unwrap();
        }
        assert!(cache.size_in_memory() <= 10);
        assert!(cache.stats().evictions >= 90);

        // Evicted values are still on disk
        assert_eq!(cache.get(&0).as_deref(), Some(&0));
        assert_eq!(cache.get(&50).as_deref(), Some(&100));
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.put(s("k"), s("v")).unwrap();
        cache.get(&s("k"));
        cache.clear();
        cache.get(&s("k"));
        cache.get(&s("absent"));

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert!(stats.misses >= 2);
        assert!(stats.disk_reads >= 1);
    }

    #[test]
    fn test_locks_released_after_operations() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.put(s("k"), s("v")).unwrap();
        cache.get(&s("k"));
        cache.remove(&s("k")).unwrap();
        let lock = crate::store::lock_path(&cache.store.bucket_path_for(&s("k")));
        assert_eq!(cache.store.locks().ref_count(&lock), 0);
    }

    #[test]
    fn test_shutdown_reaper() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert!(cache.shutdown_reaper().is_ok());
        assert!(cache.shutdown_reaper().is_ok());

        // The cache still works without its reaper
        cache.put(s("k"), s("v")).unwrap();
        assert_eq!(cache.get(&s("k")).as_deref(), Some(&s("v")));
    }
}
