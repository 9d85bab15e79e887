//! Basic usage example for BucketCache
//!
//! This example demonstrates the fundamental operations:
//! - Opening a cache
//! - Writing key-value pairs
//! - Reading values back from memory and from disk
//! - Removing keys
//! - Merging two caches

use anyhow::Result;
use bucketcache::{FileBackedCache, Options};

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let root = std::env::temp_dir().join("bucketcache_example");
    let _ = std::fs::remove_dir_all(&root);

    // Configure cache options
    let options = Options::default().max_buckets(16).memory_capacity(1_000);

    // Open cache (the directory is created if it doesn't exist)
    let cache: FileBackedCache<String, String> =
        FileBackedCache::open(root.join("main"), options.clone())?;
    println!("Cache opened at {:?}", cache.path());

    // Write some key-value pairs
    println!("Writing data...");
    cache.put("key1".to_string(), "value1".to_string())?;
    cache.put("key2".to_string(), "value2".to_string())?;
    cache.put("key3".to_string(), "value3".to_string())?;

    // Read values
    println!("Reading data...");
    if let Some(value) = cache.get(&"key1".to_string()) {
        println!("key1 => {}", value);
    }

    // Drop everything from memory; reads now come from the bucket files
    cache.clear();
    if let Some(value) = cache.get(&"key3".to_string()) {
        println!("key3 (from disk) => {}", value);
    }

    // Remove a key
    println!("Removing key2...");
    cache.remove(&"key2".to_string())?;
    match cache.get(&"key2".to_string()) {
        Some(_) => println!("key2 still exists (unexpected)"),
        None => println!("key2 was successfully removed"),
    }

    // Merge a second cache into the first
    let other: FileBackedCache<String, String> = FileBackedCache::open(root.join("other"), options)?;
    other.put("key1".to_string(), "value1-newer".to_string())?;
    other.put("key4".to_string(), "value4".to_string())?;
    FileBackedCache::merge(&cache, &[&other])?;

    println!("After merge:");
    let mut entries = cache.entries();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in entries {
        println!("  {} => {}", key, value);
    }

    println!("Stats: {:?}", cache.stats());
    cache.shutdown_reaper()?;

    Ok(())
}
