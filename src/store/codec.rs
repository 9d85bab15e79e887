//! Pluggable entry codecs.
//!
//! A codec turns one cache entry into a record payload and back. Framing and
//! checksums are handled by [`super::record`], so a codec only deals with
//! serialization. The codec also names the bucket file extension, which
//! keeps buckets written by different codecs apart in a shared directory.

use super::CacheEntry;
use crate::error::{Error, Result};
use bincode::Options as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes cache entries to and from record payloads.
pub trait RecordCodec<K, V>: Send + Sync {
    /// File extension of buckets written with this codec, without the dot.
    fn extension(&self) -> &'static str;

    /// Encode one entry.
    fn encode_entry(&self, key: &K, value: &V) -> Result<Vec<u8>>;

    /// Decode one entry.
    ///
    /// A checksummed payload that does not decode was written for other key
    /// or value types; that is reported as [`Error::Serialization`], not as
    /// corruption.
    fn decode_entry(&self, payload: &[u8]) -> Result<CacheEntry<K, V>>;
}

/// Borrowed view of an entry, serialized identically to [`CacheEntry`].
#[derive(Serialize)]
struct EntryRef<'a, K, V> {
    key: &'a K,
    value: &'a V,
}

/// Compact binary codec backed by `bincode`. The default.
///
/// Uses bincode's fixed-width integer encoding and rejects payloads with
/// bytes left over, so most key or value type mismatches fail to decode
/// instead of producing a bogus value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding().reject_trailing_bytes()
}

impl<K, V> RecordCodec<K, V> for BincodeCodec
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn extension(&self) -> &'static str {
        "bcache"
    }

    fn encode_entry(&self, key: &K, value: &V) -> Result<Vec<u8>> {
        Ok(bincode_options().serialize(&EntryRef { key, value })?)
    }

    fn decode_entry(&self, payload: &[u8]) -> Result<CacheEntry<K, V>> {
        bincode_options().deserialize(payload).map_err(mismatch)
    }
}

/// Human-readable codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<K, V> RecordCodec<K, V> for JsonCodec
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn extension(&self) -> &'static str {
        "jcache"
    }

    fn encode_entry(&self, key: &K, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&EntryRef { key, value })?)
    }

    fn decode_entry(&self, payload: &[u8]) -> Result<CacheEntry<K, V>> {
        serde_json::from_slice(payload).map_err(mismatch)
    }
}

fn mismatch(e: impl std::fmt::Display) -> Error {
    Error::Serialization(format!("Entry does not decode as the cache's key/value types: {}", e))
}
