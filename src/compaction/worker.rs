// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{CompactionReport, CompactionStrategy, DataFileStats, MajorCompaction};
use crate::{
    bucket::BucketIndex,
    data_file::{writer::remove_file_logged, DataFile, DataFileId, DataFileMeta, DataLocation},
    HalfDiskHashMap, HashMap, HashSet,
};
use std::time::Instant;

/// Merges data files of a map into fewer, denser files
///
/// Every bucket image that is still referenced is copied into new data files,
/// then the bucket locations are moved over and the old files are deleted.
/// Lookups keep working during compaction.
///
/// A compactor is a cheap handle to its map and can be moved to a background thread.
#[derive(Clone, Debug)]
pub struct DataFileCompactor {
    map: HalfDiskHashMap,
}

impl DataFileCompactor {
    pub(crate) fn new(map: HalfDiskHashMap) -> Self {
        Self { map }
    }

    /// Groups live bucket locations by data file.
    fn live_by_file(&self) -> HashMap<DataFileId, Vec<(BucketIndex, DataLocation)>> {
        let mut by_file: HashMap<_, Vec<_>> = HashMap::default();

        for (bucket, location) in self.map.locations.live() {
            by_file
                .entry(location.file_id())
                .or_default()
                .push((bucket, location));
        }

        by_file
    }

    fn collect_stats(
        &self,
        live: &HashMap<DataFileId, Vec<(BucketIndex, DataLocation)>>,
    ) -> Vec<DataFileStats> {
        self.map
            .data_files
            .list_files()
            .iter()
            .map(|file| DataFileStats {
                id: file.id(),
                item_count: file.meta.item_count,
                live_count: live.get(&file.id()).map_or(0, |x| x.len() as u64),
                file_size: file.meta.file_size,
            })
            .collect()
    }

    /// Copies bucket images into new data files.
    ///
    /// Returns `(bucket, old location, new location)` for every image, and the written files.
    #[allow(clippy::type_complexity)]
    fn copy_objects(
        &self,
        objects: &[(BucketIndex, DataLocation)],
    ) -> crate::Result<(Vec<(BucketIndex, DataLocation, DataLocation)>, Vec<DataFileMeta>)> {
        let mut writer = self.map.data_files.start_writing()?;
        let mut moves = Vec::with_capacity(objects.len());

        for &(bucket, location) in objects {
            let bytes = match self.map.data_files.read_object(location) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    log::error!("Compaction failed: data file of bucket {bucket} is missing");
                    writer.abort();
                    return Err(crate::Error::Unrecoverable);
                }
                Err(e) => {
                    log::error!("Compaction failed: could not read bucket {bucket}: {e:?}");
                    writer.abort();
                    return Err(e);
                }
            };

            match writer.store_object(&bytes) {
                Ok(new_location) => moves.push((bucket, location, new_location)),
                Err(e) => {
                    log::error!("Compaction failed: {e:?}");
                    writer.abort();
                    return Err(e);
                }
            }
        }

        Ok((moves, writer.finish()?))
    }

    /// Returns object statistics of all data files.
    #[must_use]
    pub fn stats(&self) -> Vec<DataFileStats> {
        let _lock = self.map.rollover_guard.lock().expect("lock is poisoned");
        self.collect_stats(&self.live_by_file())
    }

    /// Runs a major compaction, rewriting all data files.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn compact(&self) -> crate::Result<CompactionReport> {
        self.compact_with(&MajorCompaction)
    }

    /// Compacts the data files picked by a strategy.
    ///
    /// If compaction fails, its output is deleted and the map is left untouched.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn compact_with<S: CompactionStrategy>(&self, strategy: &S) -> crate::Result<CompactionReport> {
        log::trace!("compactor: acquiring rollover lock");
        let _lock = self.map.rollover_guard.lock().expect("lock is poisoned");

        let bytes_before = self.map.data_files.disk_space();

        if self.map.is_closed() {
            log::debug!("compactor: map is closed, nothing to do");
            return Ok(CompactionReport {
                bytes_before,
                bytes_after: bytes_before,
                ..Default::default()
            });
        }

        let live = self.live_by_file();
        let stats = self.collect_stats(&live);

        log::trace!("compactor: consulting compaction strategy {}", strategy.get_name());
        let picked = strategy
            .pick(&stats)
            .into_iter()
            .filter(|id| stats.iter().any(|x| x.id == *id))
            .collect::<HashSet<_>>();

        if picked.is_empty() {
            log::trace!("Compactor chose to do nothing");
            return Ok(CompactionReport {
                bytes_before,
                bytes_after: bytes_before,
                ..Default::default()
            });
        }

        let start = Instant::now();

        let mut objects = picked
            .iter()
            .filter_map(|id| live.get(id))
            .flatten()
            .copied()
            .collect::<Vec<_>>();

        // NOTE: Read every file front to back
        objects.sort_unstable_by_key(|(_, location)| DataLocation::to_raw(Some(*location)));

        log::debug!(
            "compactor: compacting {} data files, copying {} bucket images",
            picked.len(),
            objects.len(),
        );

        // NOTE: Dropping files that only hold dead images writes nothing
        let (moves, metas) = if objects.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            self.copy_objects(&objects)?
        };

        let files = metas
            .iter()
            .map(|meta| DataFile::open(meta.id, meta.path.clone(), meta.item_count))
            .collect::<crate::Result<Vec<_>>>()
            .inspect_err(|e| {
                log::error!("Compaction failed: {e:?}");
                for meta in &metas {
                    remove_file_logged(&meta.path);
                }
            })?;

        let file_list = self
            .map
            .data_files
            .list_ids()
            .into_iter()
            .filter(|(id, _)| !picked.contains(id))
            .chain(files.iter().map(|file| (file.id(), file.meta.item_count)))
            .collect();

        let changes = moves
            .iter()
            .map(|&(bucket, _, new_location)| (bucket, Some(new_location)))
            .collect::<Vec<_>>();

        self.map
            .next_version(file_list, &changes)
            .persist(self.map.path())
            .inspect_err(|e| {
                log::error!("Compaction failed: could not persist bucket index: {e:?}");
                for meta in &metas {
                    remove_file_logged(&meta.path);
                }
            })?;

        self.map.data_files.register(files);

        for &(bucket, old_location, new_location) in &moves {
            let swapped = self
                .map
                .locations
                .compare_and_set(bucket, Some(old_location), Some(new_location));

            debug_assert!(swapped, "bucket {bucket} moved during compaction");
        }

        let picked = picked.into_iter().collect::<Vec<_>>();
        log::trace!("compactor: dropping {} data files", picked.len());
        self.map.data_files.drop_files(&picked);

        let report = CompactionReport {
            files_in: picked.len(),
            files_out: metas.len(),
            objects_copied: moves.len() as u64,
            bytes_before,
            bytes_after: self.map.data_files.disk_space(),
        };

        log::debug!(
            "compactor: done in {:?}, {} -> {} data files, {} -> {} bytes",
            start.elapsed(),
            report.files_in,
            report.files_out,
            report.bytes_before,
            report.bytes_after,
        );

        Ok(report)
    }
}
