// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{CompactionStrategy, DataFileStats};
use crate::data_file::DataFileId;

/// Picks data files that have a certain percentage of stale bucket images
///
/// Files with no live images at all are always picked.
#[derive(Clone, Copy, Debug)]
pub struct Strategy(f32);

impl Strategy {
    /// Creates a new strategy with the given threshold.
    ///
    /// # Panics
    ///
    /// Panics if the ratio is invalid.
    #[must_use]
    pub fn new(ratio: f32) -> Self {
        assert!(
            ratio.is_finite() && ratio.is_sign_positive(),
            "invalid stale ratio"
        );
        Self(ratio.min(1.0))
    }
}

impl CompactionStrategy for Strategy {
    fn get_name(&self) -> &'static str {
        "StaleThreshold"
    }

    fn pick(&self, files: &[DataFileStats]) -> Vec<DataFileId> {
        files
            .iter()
            .filter(|x| x.live_count == 0 || x.stale_ratio() > self.0)
            .map(|x| x.id)
            .collect()
    }
}
