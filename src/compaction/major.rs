// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{CompactionStrategy, DataFileStats};
use crate::data_file::DataFileId;

/// Major compaction
///
/// Rewrites every data file, leaving only live bucket images on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct Strategy;

impl CompactionStrategy for Strategy {
    fn get_name(&self) -> &'static str {
        "MajorCompaction"
    }

    fn pick(&self, files: &[DataFileStats]) -> Vec<DataFileId> {
        files.iter().map(|x| x.id).collect()
    }
}
