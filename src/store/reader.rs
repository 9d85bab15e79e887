//! Sequential bucket reader.

use super::codec::RecordCodec;
use super::record::Record;
use super::CacheEntry;
use crate::error::Result;
use std::fs::File;
use std::io::BufReader;
use std::marker::PhantomData;
use std::path::Path;

/// Reads the entries of one bucket file in write order.
pub struct BucketReader<'a, K, V, C> {
    /// Buffered reader for efficient I/O
    reader: BufReader<File>,
    codec: &'a C,
    /// Current read position
    position: u64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K, V, C: RecordCodec<K, V>> BucketReader<'a, K, V, C> {
    /// Open a bucket file for reading
    pub fn new<P: AsRef<Path>>(path: P, codec: &'a C) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file), codec, position: 0, _marker: PhantomData })
    }

    /// Read the next entry.
    ///
    /// Returns None at a clean end of file.
    pub fn read_next(&mut self) -> Result<Option<CacheEntry<K, V>>> {
        let Some(record) = Record::read_from(&mut self.reader)? else {
            return Ok(None);
        };
        self.position += record.encoded_size() as u64;
        self.codec.decode_entry(&record.data).map(Some)
    }

    /// Get the current read position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read every remaining entry, failing on the first malformed one.
    pub fn read_all(&mut self) -> Result<Vec<CacheEntry<K, V>>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
