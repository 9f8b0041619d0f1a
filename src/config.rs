// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{path::absolute_path, HalfDiskHashMap};
use std::path::{Path, PathBuf};

const DEFAULT_FILE_FOLDER: &str = ".hdhm.data";

/// Average number of entries per bucket the bucket count is sized for
pub const TARGET_ENTRIES_PER_BUCKET: u64 = 32;

/// Map configuration builder
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Folder path
    #[doc(hidden)]
    pub path: PathBuf,

    /// Expected maximum number of keys
    #[doc(hidden)]
    pub capacity: u64,

    /// Maximum number of buckets checked out of the bucket pool at once
    #[doc(hidden)]
    pub reusable_bucket_pool_size: usize,

    /// Number of threads used to flush a write cycle
    #[doc(hidden)]
    pub flush_threads: usize,

    /// Data file target size in bytes
    #[doc(hidden)]
    pub data_file_target_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: absolute_path(DEFAULT_FILE_FOLDER),
            capacity: 1_000_000,
            reusable_bucket_pool_size: 64,
            flush_threads: 4,
            data_file_target_size: 64 * 1_024 * 1_024,
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: absolute_path(path),
            ..Default::default()
        }
    }

    /// Sets the expected maximum number of keys.
    ///
    /// The bucket count is derived from the capacity when a map is created
    /// and persisted. Reopening an existing map ignores this setting.
    ///
    /// Defaults to 1 million keys.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn capacity(mut self, n: u64) -> Self {
        assert!(n > 0);

        self.capacity = n;
        self
    }

    /// Sets the number of reusable buckets.
    ///
    /// This bounds the memory used by buckets that are being read or
    /// rewritten at the same time.
    ///
    /// Defaults to 64.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn reusable_bucket_pool_size(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.reusable_bucket_pool_size = n;
        self
    }

    /// Sets the number of threads used to apply and write bucket mutations.
    ///
    /// Defaults to 4.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn flush_threads(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.flush_threads = n;
        self
    }

    /// Sets the target size of data files.
    ///
    /// Smaller data files allow more granular compaction,
    /// larger data files decrease the number of files on disk.
    ///
    /// Defaults to 64 MiB.
    #[must_use]
    pub fn data_file_target_size(mut self, bytes: u64) -> Self {
        self.data_file_target_size = bytes;
        self
    }

    /// Returns the number of buckets a new map with this config gets.
    ///
    /// Always a power of two.
    #[must_use]
    pub fn bucket_count(&self) -> u32 {
        let buckets = self.capacity.div_ceil(TARGET_ENTRIES_PER_BUCKET).max(1);
        let buckets = buckets.min(1 << 31);

        #[allow(clippy::cast_possible_truncation)]
        let buckets = buckets as u32;

        buckets.next_power_of_two()
    }

    /// Opens a map using the config.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(self) -> crate::Result<HalfDiskHashMap> {
        HalfDiskHashMap::open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn config_bucket_count() {
        assert_eq!(1, Config::new(".").capacity(1).bucket_count());
        assert_eq!(1, Config::new(".").capacity(32).bucket_count());
        assert_eq!(2, Config::new(".").capacity(33).bucket_count());
        assert_eq!(32, Config::new(".").capacity(1_000).bucket_count());
        assert_eq!(32_768, Config::default().bucket_count());
        assert_eq!(1 << 31, Config::new(".").capacity(u64::MAX).bucket_count());
    }

    #[test]
    #[should_panic]
    fn config_zero_pool() {
        let _ = Config::new(".").reusable_bucket_pool_size(0);
    }
}
