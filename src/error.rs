//! Error types for BucketCache.

use std::io;
use thiserror::Error;

/// The result type used throughout BucketCache.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for BucketCache operations.
///
/// Read paths never surface these: disk trouble during a read degrades to
/// "not found" after logging. Only construction, writes and explicit waits
/// on the reaper return errors.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed bucket content was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An invalid argument or configuration was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record checksum did not match its payload.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored in the record header.
        expected: u32,
        /// The checksum computed over the payload.
        actual: u32,
    },

    /// The background reaper terminated abnormally.
    #[error("Reaper terminated abnormally: {0}")]
    ReaperTerminated(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns true if this error means the bucket content is malformed.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
