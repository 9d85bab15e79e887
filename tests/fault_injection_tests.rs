// Fault Injection Tests for BucketCache
// These tests damage bucket files and contend for locks to check that reads
// degrade to "not found" and writes keep working

use bucketcache::{Error, FileBackedCache, JsonCodec, Options};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type Cache = FileBackedCache<String, String>;

/// Every key lands in bucket 0
fn open_single_bucket(dir: &TempDir) -> Cache {
    FileBackedCache::open(dir.path(), Options::default().max_buckets(1)).unwrap()
}

/// Garbage in a bucket reads as "not found" and the bucket is deleted
#[test]
fn test_garbage_bucket_is_deleted() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    let bucket = dir.path().join("0.bcache");
    fs::write(&bucket, b"this is definitely not a bucket").unwrap();

    assert_eq!(cache.get(&"anything".to_string()), None);
    assert!(!bucket.exists());
    assert_eq!(cache.stats().corruptions, 1);

    // The bucket is usable again afterwards
    cache.put("fresh".to_string(), "value".to_string()).unwrap();
    cache.clear();
    assert_eq!(cache.get(&"fresh".to_string()).as_deref().map(String::as_str), Some("value"));
}

/// A bucket cut off mid-record is dropped whole, never silently truncated
#[test]
fn test_truncated_bucket_is_deleted() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    cache.put("first".to_string(), "one".to_string()).unwrap();
    cache.put("second".to_string(), "two".to_string()).unwrap();
    cache.clear();

    let bucket = dir.path().join("0.bcache");
    let len = fs::metadata(&bucket).unwrap().len();
    let file = OpenOptions::new().write(true).open(&bucket).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    assert_eq!(cache.get(&"first".to_string()), None);
    assert_eq!(cache.get(&"second".to_string()), None);
    assert!(!bucket.exists());
    assert_eq!(cache.size(), 0);
}

/// A flipped payload byte fails the checksum
#[test]
fn test_checksum_mismatch_is_corruption() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    cache.put("key".to_string(), "value".to_string()).unwrap();
    cache.clear();

    let bucket = dir.path().join("0.bcache");
    let mut bytes = fs::read(&bucket).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&bucket, &bytes).unwrap();

    assert_eq!(cache.get(&"key".to_string()), None);
    assert!(!bucket.exists());
    assert_eq!(cache.stats().corruptions, 1);
}

/// Corruption found by a whole-map query is handled the same way
#[test]
fn test_corruption_during_iteration() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache: FileBackedCache<u32, u32> =
        FileBackedCache::open(dir.path(), Options::default().max_buckets(4)).unwrap();

    for i in 0..40 {
        cache.put(i, i).unwrap();
    }
    let damaged = dir.path().join("2.bcache");
    fs::write(&damaged, [0u8; 5]).unwrap();

    // Keys 2, 6, 10, ... were in the damaged bucket
    assert_eq!(cache.size(), 30);
    assert!(!damaged.exists());
    assert_eq!(cache.keys().iter().filter(|k| *k % 4 == 2).count(), 0);
}

/// Corruption found while neighbours are still in memory drops them too
#[test]
fn test_corruption_purges_memory_on_get() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    cache.put("a".to_string(), "1".to_string()).unwrap();
    cache.put("b".to_string(), "2".to_string()).unwrap();
    let bucket = dir.path().join("0.bcache");
    OpenOptions::new().append(true).open(&bucket).unwrap().write_all(b"xyz").unwrap();

    // Only "b" goes to disk; "a" is still held in memory
    cache.remove_from_memory(&"b".to_string());
    assert_eq!(cache.get(&"b".to_string()), None);
    assert!(!bucket.exists());
    assert_eq!(cache.get(&"a".to_string()), None);

    // Re-putting the old value must reach disk again
    cache.put("a".to_string(), "1".to_string()).unwrap();
    assert_eq!(cache.size(), 1);
    cache.clear();
    assert_eq!(cache.get(&"a".to_string()).as_deref().map(String::as_str), Some("1"));
}

/// A write that finds the bucket corrupt drops the lost neighbours from memory
#[test]
fn test_corruption_purges_memory_on_put() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    cache.put("a".to_string(), "1".to_string()).unwrap();
    cache.put("b".to_string(), "2".to_string()).unwrap();
    let bucket = dir.path().join("0.bcache");
    OpenOptions::new().append(true).open(&bucket).unwrap().write_all(b"xyz").unwrap();

    cache.put("a".to_string(), "changed".to_string()).unwrap();
    assert_eq!(cache.get(&"b".to_string()), None);
    assert_eq!(cache.get(&"a".to_string()).as_deref().map(String::as_str), Some("changed"));

    let entries = cache.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "a");
    assert_eq!(cache.stats().corruptions, 1);
}

/// Reopening a directory with the wrong value type never deletes its buckets
#[test]
fn test_value_type_mismatch_keeps_bucket_bincode() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    {
        let cache = open_single_bucket(&dir);
        cache.put("a".to_string(), "hello".to_string()).unwrap();
    }

    let numbers: FileBackedCache<String, u64> =
        FileBackedCache::open(dir.path(), Options::default().max_buckets(1)).unwrap();
    assert_eq!(numbers.get(&"a".to_string()), None);
    assert!(matches!(numbers.put("a".to_string(), 5), Err(Error::Serialization(_))));
    assert_eq!(numbers.stats().corruptions, 0);
    drop(numbers);

    let cache = open_single_bucket(&dir);
    assert_eq!(cache.get(&"a".to_string()).as_deref().map(String::as_str), Some("hello"));
}

/// Same for the JSON codec
#[test]
fn test_value_type_mismatch_keeps_bucket_json() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let options = Options::default().max_buckets(1);
    {
        let cache: FileBackedCache<String, String, JsonCodec> =
            FileBackedCache::open_with_codec(dir.path(), options.clone(), JsonCodec).unwrap();
        cache.put("a".to_string(), "hello".to_string()).unwrap();
    }

    let numbers: FileBackedCache<String, u64, JsonCodec> =
        FileBackedCache::open_with_codec(dir.path(), options.clone(), JsonCodec).unwrap();
    assert_eq!(numbers.get(&"a".to_string()), None);
    assert!(matches!(numbers.remove(&"a".to_string()), Err(Error::Serialization(_))));
    assert!(dir.path().join("0.jcache").exists());
    drop(numbers);

    let cache: FileBackedCache<String, String, JsonCodec> =
        FileBackedCache::open_with_codec(dir.path(), options, JsonCodec).unwrap();
    assert_eq!(cache.size(), 1);
}

/// A bucket that vanishes under the cache reads as empty
#[test]
fn test_bucket_deleted_externally() {
    let dir = TempDir::new().unwrap();
    let cache = open_single_bucket(&dir);

    cache.put("key".to_string(), "value".to_string()).unwrap();
    cache.clear();
    fs::remove_file(dir.path().join("0.bcache")).unwrap();

    assert_eq!(cache.get(&"key".to_string()), None);
    assert_eq!(cache.remove(&"key".to_string()).unwrap(), None);
    assert_eq!(cache.stats().corruptions, 0);
}

/// An advisory lock held elsewhere delays, then is ignored
#[test]
fn test_contended_lock_falls_back_to_unlocked() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let cache: Cache = FileBackedCache::open(
        dir.path(),
        Options::default().max_buckets(1).lock_retry(3, Duration::from_millis(20)),
    )
    .unwrap();

    // Another open file description holds the bucket's lock
    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.path().join("0.bcache.lock"))
        .unwrap();
    holder.lock_exclusive().unwrap();

    let start = Instant::now();
    cache.put("key".to_string(), "value".to_string()).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(40));

    cache.clear();
    assert_eq!(cache.get(&"key".to_string()).as_deref().map(String::as_str), Some("value"));

    holder.unlock().unwrap();
}

/// Removing the cache directory does not make reads fail
#[test]
fn test_directory_removed_reads_degrade() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache");
    let cache: Cache = FileBackedCache::open(&path, Options::default().max_buckets(2)).unwrap();

    cache.put("key".to_string(), "value".to_string()).unwrap();
    cache.clear();
    fs::remove_dir_all(&path).unwrap();

    assert_eq!(cache.get(&"key".to_string()), None);
    assert_eq!(cache.size(), 0);
    assert!(cache.keys().is_empty());
    // Writes do report the failure
    assert!(cache.put("key".to_string(), "value".to_string()).is_err());
}
