//! # BucketCache - A Hybrid Memory/Disk Key-Value Cache
//!
//! BucketCache keeps every entry on disk and the recently used ones in
//! memory. Keys are hashed into bucket files; each bucket is a small append
//! log of checksummed records.
//!
//! ## Architecture
//!
//! The cache consists of several components:
//!
//! - **Addressing**: Maps a key's stable hash to a bucket id
//! - **Lock Manager**: Reference-counted per-path locks wrapping OS advisory locks
//! - **Block Store**: Whole-bucket read, append and rewrite operations
//! - **Memory Index**: Weak handles to values kept alive by a bounded LRU
//! - **Reaper**: Background thread pruning handles whose values were released
//! - **FileBackedCache**: The map-like API composing the above, plus merge
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bucketcache::{FileBackedCache, Options};
//!
//! # fn main() -> Result<(), bucketcache::Error> {
//! // Open or create a cache with 64 bucket files
//! let cache: FileBackedCache<String, Vec<u8>> =
//!     FileBackedCache::open("./cache", Options::default().max_buckets(64))?;
//!
//! // Write operations go to disk immediately
//! cache.put("key1".to_string(), b"value1".to_vec())?;
//!
//! // Read operations never fail; disk trouble reads as "not found"
//! if let Some(value) = cache.get(&"key1".to_string()) {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Remove from memory and disk
//! cache.remove(&"key1".to_string())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! This is a cache, not a database. There is no cross-key atomicity and no
//! durability promise when several processes write the same bucket at once.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod addressing;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod lock;
pub mod store;

// Re-exports
pub use addressing::{bucket_id, StableHash};
pub use cache::{CacheKey, CacheStats, CacheValue, FileBackedCache, Iter};
pub use config::Options;
pub use error::{Error, Result};
pub use lock::LockManager;
pub use store::{BincodeCodec, CacheEntry, JsonCodec, RecordCodec};
