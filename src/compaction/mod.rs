// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Contains compaction strategies

pub(crate) mod major;
pub(crate) mod stale_threshold;
pub(crate) mod worker;

pub use major::Strategy as MajorCompaction;
pub use stale_threshold::Strategy as StaleThreshold;
pub use worker::DataFileCompactor;

use crate::data_file::DataFileId;

/// Object statistics of a data file
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataFileStats {
    /// Data file ID
    pub id: DataFileId,

    /// Number of objects stored in the file
    pub item_count: u64,

    /// Number of objects that are still referenced by a bucket
    pub live_count: u64,

    /// File size in bytes
    pub file_size: u64,
}

impl DataFileStats {
    /// Returns the number of objects that are no longer referenced.
    #[must_use]
    pub fn stale_count(&self) -> u64 {
        self.item_count.saturating_sub(self.live_count)
    }

    /// Calculates the stale ratio (percentage).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stale_ratio(&self) -> f32 {
        if self.item_count == 0 {
            return 0.0;
        }

        self.stale_count() as f32 / self.item_count as f32
    }
}

/// Trait for a compaction strategy
///
/// The strategy receives statistics of all data files
/// and chooses which files to compact.
pub trait CompactionStrategy {
    /// Gets the compaction strategy name.
    fn get_name(&self) -> &'static str;

    /// Picks data files to compact.
    fn pick(&self, files: &[DataFileStats]) -> Vec<DataFileId>;
}

/// Statistics report of a compaction
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompactionReport {
    /// Number of data files that were compacted
    pub files_in: usize,

    /// Number of data files that were written
    pub files_out: usize,

    /// Number of bucket images that were copied
    pub objects_copied: u64,

    /// Total size of all data files before compaction
    pub bytes_before: u64,

    /// Total size of all data files after compaction
    pub bytes_after: u64,
}

impl std::fmt::Display for CompactionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "--- Compaction report ---")?;
        writeln!(f, "Files in    : {}", self.files_in)?;
        writeln!(f, "Files out   : {}", self.files_out)?;
        writeln!(f, "Objects     : {}", self.objects_copied)?;
        writeln!(f, "Bytes before: {}", self.bytes_before)?;
        writeln!(f, "Bytes after : {}", self.bytes_after)?;
        writeln!(f, "--- Compaction report done ---")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn stats_stale_ratio() {
        let stats = DataFileStats {
            id: 1,
            item_count: 4,
            live_count: 1,
            file_size: 100,
        };
        assert_eq!(3, stats.stale_count());
        assert!((stats.stale_ratio() - 0.75).abs() < f32::EPSILON);

        let empty = DataFileStats {
            item_count: 0,
            live_count: 0,
            ..stats
        };
        assert!(empty.stale_ratio().abs() < f32::EPSILON);
    }
}
