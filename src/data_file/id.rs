// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{location::MAX_DATA_FILE_ID, DataFileId};
use std::{
    path::Path,
    sync::{
        atomic::{
            AtomicU64,
            Ordering::{AcqRel, Acquire},
        },
        Arc,
    },
};

fn in_range(id: DataFileId) -> DataFileId {
    if (1..=MAX_DATA_FILE_ID).contains(&id) {
        id
    } else {
        1
    }
}

/// Thread-safe data file ID generator
///
/// IDs count up to [`MAX_DATA_FILE_ID`], then wrap around to 1.
/// An ID is only handed out if no file with that ID exists in the data file folder,
/// which holds exactly the live and in-progress files.
#[derive(Clone, Debug)]
pub struct DataFileIdCounter(Arc<AtomicU64>);

impl Default for DataFileIdCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DataFileIdCounter {
    /// Creates a new counter, starting at `next`.
    #[must_use]
    pub fn new(next: DataFileId) -> Self {
        Self(Arc::new(AtomicU64::new(next)))
    }

    fn advance(&self) -> DataFileId {
        let prev = self
            .0
            .fetch_update(AcqRel, Acquire, |id| Some(in_range(id) % MAX_DATA_FILE_ID + 1));

        match prev {
            Ok(id) | Err(id) => in_range(id),
        }
    }

    /// Gets the next ID that has no file in `folder`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if every ID is in use.
    pub fn next(&self, folder: &Path) -> crate::Result<DataFileId> {
        for _ in 0..MAX_DATA_FILE_ID {
            let id = self.advance();

            if !folder.join(id.to_string()).try_exists()? {
                return Ok(id);
            }

            log::trace!("Data file #{id} is still in use, skipping");
        }

        panic!("ran out of data file IDs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn id_counter_counts_up() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let ids = DataFileIdCounter::default();

        assert_eq!(1, ids.next(folder.path())?);
        assert_eq!(2, ids.next(folder.path())?);
        assert_eq!(3, ids.clone().next(folder.path())?);

        Ok(())
    }

    #[test]
    fn id_counter_wraps_around() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let ids = DataFileIdCounter::new(MAX_DATA_FILE_ID);

        std::fs::write(folder.path().join("1"), b"")?;
        std::fs::write(folder.path().join("3"), b"")?;

        assert_eq!(MAX_DATA_FILE_ID, ids.next(folder.path())?);
        assert_eq!(2, ids.next(folder.path())?);
        assert_eq!(4, ids.next(folder.path())?);

        Ok(())
    }

    #[test]
    fn id_counter_out_of_range_restarts() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let ids = DataFileIdCounter::new(MAX_DATA_FILE_ID + 1);

        assert_eq!(1, ids.next(folder.path())?);

        Ok(())
    }
}
