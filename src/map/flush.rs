// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::HalfDiskHashMap;
use crate::{
    bucket::{mutation::BucketMutation, BucketIndex},
    data_file::{writer::remove_file_logged, DataFile, DataFileMeta, MultiWriter},
    HashMap,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc,
};

/// Outcome of applying a cycle's mutations to one bucket
enum Rewrite {
    /// Bucket did not exist and is still empty
    Unchanged,

    /// Bucket existed and is now empty
    Removed,

    /// New bucket image
    Stored(Vec<u8>),
}

fn remove_files(metas: &[DataFileMeta]) {
    for meta in metas {
        remove_file_logged(&meta.path);
    }
}

impl HalfDiskHashMap {
    /// Loads a bucket, applies its mutations and encodes the result.
    fn rewrite_bucket(
        &self,
        bucket_index: BucketIndex,
        mutation: &BucketMutation,
    ) -> crate::Result<Rewrite> {
        let mut bucket = self.pool.get_bucket();
        let previous = self.locations.get(bucket_index);

        if let Some(location) = previous {
            let Some(bytes) = self.data_files.read_object(location)? else {
                log::error!("Bucket {bucket_index} points into missing data file at {location}");
                return Err(crate::Error::Unrecoverable);
            };
            self.load_bucket(&mut bucket, bucket_index, &bytes)?;
        } else {
            bucket.set_bucket_index(bucket_index);
        }

        mutation.for_each_key_value(|key, hash, old_value, value| match old_value {
            Some(expected_old) => bucket.put_value_if_equal(key, hash, expected_old, value),
            None => bucket.put_value(key, hash, value),
        });

        if bucket.is_empty() {
            return Ok(if previous.is_some() {
                Rewrite::Removed
            } else {
                Rewrite::Unchanged
            });
        }

        let mut bytes = Vec::with_capacity(bucket.size_in_bytes());
        bucket.write_to(&mut bytes)?;

        Ok(Rewrite::Stored(bytes))
    }

    /// Writes all touched buckets and publishes their new locations.
    ///
    /// Caller must hold the rollover guard.
    pub(super) fn flush(&self, mutations: HashMap<BucketIndex, BucketMutation>) -> crate::Result<()> {
        let mut work = mutations.into_iter().collect::<Vec<_>>();
        work.sort_unstable_by_key(|(bucket, _)| *bucket);

        let bucket_count = work.len();
        let thread_count = self.config.flush_threads.clamp(1, bucket_count.max(1));

        log::debug!(
            "Flushing write cycle at {}: {bucket_count} buckets using {thread_count} threads",
            self.config.path.display(),
        );

        // NOTE: Only created once a bucket produces an image
        let mut writer: Option<MultiWriter> = None;
        let mut changes = Vec::with_capacity(bucket_count);

        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::sync_channel(self.pool.capacity());

        let result = std::thread::scope(|scope| {
            for _ in 0..thread_count {
                let tx = tx.clone();
                let work = &work;
                let cursor = &cursor;

                scope.spawn(move || {
                    while let Some((bucket_index, mutation)) =
                        work.get(cursor.fetch_add(1, Ordering::Relaxed))
                    {
                        let result = self
                            .rewrite_bucket(*bucket_index, mutation)
                            .map(|rewrite| (*bucket_index, rewrite));

                        let failed = result.is_err();

                        // NOTE: The receiver is gone if writing failed
                        if tx.send(result).is_err() || failed {
                            break;
                        }
                    }
                });
            }

            drop(tx);

            for message in rx {
                let (bucket_index, rewrite) = message?;

                match rewrite {
                    Rewrite::Unchanged => {}
                    Rewrite::Removed => changes.push((bucket_index, None)),
                    Rewrite::Stored(bytes) => {
                        let active = match &mut writer {
                            Some(active) => active,
                            None => writer.insert(self.data_files.start_writing()?),
                        };

                        let location = active.store_object(&bytes)?;
                        changes.push((bucket_index, Some(location)));
                    }
                }
            }

            Ok::<_, crate::Error>(())
        });

        if let Err(e) = result {
            log::error!("Flushing write cycle failed: {e:?}");
            if let Some(writer) = writer {
                writer.abort();
            }
            return Err(e);
        }

        let metas = match writer {
            Some(writer) => writer.finish()?,
            None => Vec::new(),
        };

        let files = metas
            .iter()
            .map(|meta| DataFile::open(meta.id, meta.path.clone(), meta.item_count))
            .collect::<crate::Result<Vec<_>>>()
            .inspect_err(|_| remove_files(&metas))?;

        let mut file_list = self.data_files.list_ids();
        file_list.extend(files.iter().map(|file| (file.id(), file.meta.item_count)));

        let version = self.next_version(file_list, &changes);

        version.persist(&self.config.path).inspect_err(|e| {
            log::error!("Could not persist bucket index: {e:?}");
            remove_files(&metas);
        })?;

        self.data_files.register(files);

        for (bucket_index, location) in &changes {
            self.locations.set(*bucket_index, *location);
        }

        log::debug!(
            "Flushed write cycle: {} buckets changed, {} new data files",
            changes.len(),
            metas.len(),
        );

        Ok(())
    }
}
