//! Configuration options for BucketCache.

use std::time::Duration;

/// Default number of values strongly retained in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Default number of attempts made to obtain an OS advisory lock.
pub const DEFAULT_LOCK_RETRY_ATTEMPTS: usize = 1000;

/// Configuration options for opening a cache.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the cache directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Maximum number of bucket files. Key hashes are folded into
    /// `0..max_buckets`. `None` uses the raw hash as the bucket id.
    /// Default: None
    pub max_buckets: Option<u32>,

    /// Number of values kept strongly reachable by the in-memory index.
    /// Values beyond this are released and must be re-read from disk.
    /// Default: 10000
    pub memory_capacity: usize,

    /// Pause between reaper passes.
    /// Default: 100ms
    pub reaper_interval: Duration,

    /// Attempts made to obtain an OS advisory lock before proceeding without it.
    /// Default: 1000
    pub lock_retry_attempts: usize,

    /// Pause between OS advisory lock attempts.
    /// Default: 1s
    pub lock_retry_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_buckets: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            reaper_interval: Duration::from_millis(100),
            lock_retry_attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            lock_retry_interval: Duration::from_secs(1),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the cache directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Bounds the number of bucket files.
    pub fn max_buckets(mut self, buckets: u32) -> Self {
        self.max_buckets = Some(buckets);
        self
    }

    /// Sets how many values stay strongly reachable in memory.
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Sets the pause between reaper passes.
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Sets the OS lock retry policy.
    pub fn lock_retry(mut self, attempts: usize, interval: Duration) -> Self {
        self.lock_retry_attempts = attempts;
        self.lock_retry_interval = interval;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_buckets == Some(0) {
            return Err(crate::Error::invalid_argument("max_buckets must be > 0"));
        }
        if self.memory_capacity == 0 {
            return Err(crate::Error::invalid_argument("memory_capacity must be > 0"));
        }
        if self.lock_retry_attempts == 0 {
            return Err(crate::Error::invalid_argument("lock_retry_attempts must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert_eq!(opts.max_buckets, None);
        assert_eq!(opts.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert_eq!(opts.lock_retry_attempts, 1000);
        assert_eq!(opts.lock_retry_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .max_buckets(16)
            .memory_capacity(64)
            .lock_retry(3, Duration::from_millis(5))
            .create_if_missing(false);

        assert_eq!(opts.max_buckets, Some(16));
        assert_eq!(opts.memory_capacity, 64);
        assert_eq!(opts.lock_retry_attempts, 3);
        assert!(!opts.create_if_missing);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.max_buckets = Some(0);
        assert!(opts.validate().is_err());

        opts.max_buckets = Some(4);
        opts.memory_capacity = 0;
        assert!(opts.validate().is_err());
    }
}
