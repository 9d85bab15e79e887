//! Bucket writer.

use super::codec::RecordCodec;
use super::record::Record;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

/// Writes framed entries to a bucket file.
pub struct BucketWriter<'a, K, V, C> {
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    codec: &'a C,
    /// Records written through this writer
    records: usize,
    _marker: PhantomData<fn(&K, &V)>,
}

impl<'a, K, V, C: RecordCodec<K, V>> BucketWriter<'a, K, V, C> {
    /// Open `path` for appending, creating it if it doesn't exist.
    pub fn append<P: AsRef<Path>>(path: P, codec: &'a C) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_file(file, codec))
    }

    /// Create `path` empty, truncating any previous content.
    pub fn create<P: AsRef<Path>>(path: P, codec: &'a C) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(Self::from_file(file, codec))
    }

    fn from_file(file: File, codec: &'a C) -> Self {
        Self { writer: BufWriter::new(file), codec, records: 0, _marker: PhantomData }
    }

    /// Append one entry
    pub fn write(&mut self, key: &K, value: &V) -> Result<()> {
        let payload = self.codec.encode_entry(key, value)?;
        let encoded = Record::new(payload).encode()?;
        self.writer.write_all(&encoded)?;
        self.records += 1;
        Ok(())
    }

    /// Flush buffered records to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync the file.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Number of records written through this writer
    pub fn records(&self) -> usize {
        self.records
    }
}

impl<K, V, C> Drop for BucketWriter<'_, K, V, C> {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}
