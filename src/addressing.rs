//! Bucket addressing.
//!
//! Every key is mapped to a bucket id from a hash that must be stable across
//! process runs, because the id names a file that outlives the process.
//! `std::hash::Hash` makes no such promise, so keys implement [`StableHash`].
//!
//! With a bounded bucket count the id is `|hash| mod max_buckets`; without
//! one the raw hash is the id. Distinct keys may share a bucket and are told
//! apart by a linear scan of the bucket's records.

/// A hash code that is identical for equal values in every process.
pub trait StableHash {
    /// Returns the stable hash of this value.
    fn stable_hash(&self) -> i32;
}

impl StableHash for [u8] {
    fn stable_hash(&self) -> i32 {
        crc32fast::hash(self) as i32
    }
}

impl StableHash for Vec<u8> {
    fn stable_hash(&self) -> i32 {
        self.as_slice().stable_hash()
    }
}

impl StableHash for str {
    fn stable_hash(&self) -> i32 {
        self.as_bytes().stable_hash()
    }
}

impl StableHash for String {
    fn stable_hash(&self) -> i32 {
        self.as_str().stable_hash()
    }
}

impl StableHash for i32 {
    fn stable_hash(&self) -> i32 {
        *self
    }
}

impl StableHash for u32 {
    fn stable_hash(&self) -> i32 {
        *self as i32
    }
}

impl StableHash for u64 {
    fn stable_hash(&self) -> i32 {
        (*self ^ (*self >> 32)) as i32
    }
}

impl StableHash for i64 {
    fn stable_hash(&self) -> i32 {
        (*self as u64).stable_hash()
    }
}

impl StableHash for usize {
    fn stable_hash(&self) -> i32 {
        (*self as u64).stable_hash()
    }
}

impl<T: StableHash + ?Sized> StableHash for &T {
    fn stable_hash(&self) -> i32 {
        (**self).stable_hash()
    }
}

/// Maps a key hash to a bucket id.
///
/// `None` means unbounded: the hash itself is the id and may be negative.
pub fn bucket_id(hash: i32, max_buckets: Option<u32>) -> i64 {
    match max_buckets {
        None => hash as i64,
        Some(max) => (hash.unsigned_abs() % max) as i64,
    }
}

/// Generate the bucket filename for a bucket id and codec extension
pub fn bucket_filename(id: i64, extension: &str) -> String {
    format!("{}.{}", id, extension)
}

/// Parse a bucket filename to extract the bucket id
pub fn parse_bucket_filename(filename: &str, extension: &str) -> Option<i64> {
    let name = filename.strip_suffix(extension)?.strip_suffix('.')?;
    name.parse().ok()
}
