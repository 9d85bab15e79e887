//! Bucket record framing.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of the payload
//! - Length (4 bytes): Length of the payload
//! - Payload (variable): One codec-encoded cache entry
//!
//! A bucket is a sequence of records ending at a record boundary. Anything
//! else (short header, short payload, bad checksum, absurd length) is
//! corruption.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Read};

/// Largest payload a record may carry. Longer length fields are treated as
/// corruption rather than allocated.
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// Size of the record header (checksum + length)
pub const HEADER_SIZE: usize = 8;

/// A framed bucket record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Encoded entry
    pub data: Vec<u8>,
}

impl Record {
    /// Create a new record
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Encode the record into bytes
    ///
    /// Format: [checksum: u32][length: u32][data: bytes]
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_RECORD_SIZE {
            return Err(Error::invalid_argument(format!(
                "Record too large: {} bytes (max {})",
                self.data.len(),
                MAX_RECORD_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_u32_le(crc32fast::hash(&self.data));
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        Ok(buf.to_vec())
    }

    /// Read the next record from `reader`.
    ///
    /// Returns `None` at a clean end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut header = [0u8; HEADER_SIZE];
        match read_fully(reader, &mut header)? {
            0 => return Ok(None),
            n if n < HEADER_SIZE => {
                return Err(Error::corruption(format!(
                    "Truncated record header: {} of {} bytes",
                    n, HEADER_SIZE
                )));
            }
            _ => {}
        }

        let mut header = &header[..];
        let checksum = header.get_u32_le();
        let length = header.get_u32_le() as usize;

        if length > MAX_RECORD_SIZE {
            return Err(Error::corruption(format!("Record length {} exceeds maximum", length)));
        }

        let mut data = vec![0u8; length];
        let read = read_fully(reader, &mut data)?;
        if read < length {
            return Err(Error::corruption(format!(
                "Incomplete record: expected {} bytes, got {}",
                length, read
            )));
        }

        let actual = crc32fast::hash(&data);
        if actual != checksum {
            return Err(Error::ChecksumMismatch { expected: checksum, actual });
        }

        Ok(Some(Record { data }))
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// Like `read_exact`, but reports how much was read instead of failing on a
/// short stream.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
