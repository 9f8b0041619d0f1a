// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod flush;

use crate::{
    bucket::{mutation::BucketMutation, pool::ReusableBucketPool, Bucket, BucketIndex},
    compaction::DataFileCompactor,
    config::Config,
    data_file::{DataFileCollection, DataFileId, DataLocation},
    file::{fsync_directory, DATA_FOLDER},
    locations::{BucketLocations, IndexVersion},
    value::{is_sentinel, DELETE_MARKER},
    HashMap, KeyHash, Value,
};
use std::{
    collections::hash_map::Entry,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Shared state of a [`HalfDiskHashMap`]
#[allow(clippy::module_name_repetitions)]
pub struct MapInner {
    pub(crate) config: Config,

    /// Bucket index mask (bucket count - 1)
    mask: u32,

    /// Current location of every bucket
    pub(crate) locations: BucketLocations,

    pub(crate) data_files: DataFileCollection,

    pub(crate) pool: ReusableBucketPool,

    /// Pending mutations of the open write cycle, if any
    cycle: Mutex<Option<HashMap<BucketIndex, BucketMutation>>>,

    /// Serializes everything that publishes a new bucket index version,
    /// and snapshots
    pub(crate) rollover_guard: Mutex<()>,

    is_closed: AtomicBool,
}

/// A persistent hash map from keys to 64-bit values
///
/// Keys are hashed into a fixed number of buckets. Only the location of each
/// bucket is kept in memory, the buckets themselves live in data files on disk.
///
/// Writes are batched in write cycles: [`HalfDiskHashMap::start_writing`],
/// any number of puts and deletes, then [`HalfDiskHashMap::end_writing`].
/// Reads only ever see committed cycles.
///
/// The map is a cheap handle and can be cloned and shared between threads.
#[derive(Clone)]
pub struct HalfDiskHashMap(pub(crate) Arc<MapInner>);

impl std::ops::Deref for HalfDiskHashMap {
    type Target = MapInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for HalfDiskHashMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HalfDiskHashMap({}, buckets={})",
            self.config.path.display(),
            self.bucket_count(),
        )
    }
}

impl HalfDiskHashMap {
    /// Opens a map, recovering it from disk if it exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the map on disk is corrupted.
    pub fn open(config: Config) -> crate::Result<Self> {
        let path = config.path.clone();
        log::info!("Opening half-disk hash map at {}", path.display());

        std::fs::create_dir_all(&path)?;

        let version = match IndexVersion::load(&path)? {
            Some(version) => {
                log::debug!(
                    "Recovering map with {} buckets, {} live buckets, {} data files",
                    version.bucket_count,
                    version.locations.len(),
                    version.data_files.len(),
                );
                version
            }
            None => {
                let version = IndexVersion {
                    bucket_count: config.bucket_count(),
                    ..Default::default()
                };

                log::debug!(
                    "Creating new map with {} buckets (capacity={})",
                    version.bucket_count,
                    config.capacity,
                );

                version.persist(&path)?;
                version
            }
        };

        let data_files = DataFileCollection::recover(
            path.join(DATA_FOLDER),
            &version.data_files,
            config.data_file_target_size,
        )?;
        fsync_directory(&path)?;

        let locations = BucketLocations::new(version.bucket_count);

        for &(bucket, location) in &version.locations {
            if data_files.get(location.file_id()).is_none() {
                log::error!("Bucket {bucket} points into unknown data file #{}", location.file_id());
                return Err(crate::Error::Unrecoverable);
            }
            locations.set(bucket, Some(location));
        }

        let pool = ReusableBucketPool::new(config.reusable_bucket_pool_size, Bucket::new);

        log::info!(
            "Opened half-disk hash map at {} ({} buckets)",
            path.display(),
            version.bucket_count,
        );

        Ok(Self(Arc::new(MapInner {
            mask: version.bucket_count - 1,
            config,
            locations,
            data_files,
            pool,
            cycle: Mutex::new(None),
            rollover_guard: Mutex::new(()),
            is_closed: AtomicBool::new(false),
        })))
    }

    /// Returns the map folder.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the number of buckets.
    #[must_use]
    pub fn bucket_count(&self) -> u32 {
        self.locations.bucket_count()
    }

    /// Returns the number of data files.
    #[must_use]
    pub fn data_file_count(&self) -> usize {
        self.data_files.len()
    }

    /// Returns the total size of all data files in bytes.
    #[must_use]
    pub fn disk_space(&self) -> u64 {
        self.data_files.disk_space()
    }

    /// Returns `true` if the map was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Returns `true` if a write cycle is open.
    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.cycle.lock().expect("lock is poisoned").is_some()
    }

    /// Returns a compactor for this map, which can be moved to another thread.
    #[must_use]
    pub fn compactor(&self) -> DataFileCompactor {
        DataFileCompactor::new(self.clone())
    }

    /// Returns the bucket a key hash belongs to.
    #[must_use]
    pub fn bucket_index_of(&self, hash: KeyHash) -> BucketIndex {
        #[allow(clippy::cast_sign_loss)]
        let hash = hash as u32;
        hash & self.mask
    }

    /// Looks up the value of a key.
    ///
    /// Only committed write cycles are visible. Returns `not_found` if the key
    /// does not exist, or the map is closed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the bucket on disk is corrupted.
    pub fn get(&self, key: &[u8], hash: KeyHash, not_found: Value) -> crate::Result<Value> {
        if self.is_closed() {
            return Ok(not_found);
        }

        let bucket_index = self.bucket_index_of(hash);

        loop {
            let Some(location) = self.locations.get(bucket_index) else {
                return Ok(not_found);
            };

            let Some(bytes) = self.data_files.read_object(location)? else {
                if self.is_closed() {
                    return Ok(not_found);
                }

                // NOTE: Compaction publishes new locations before deleting files,
                // so the location must have moved by now
                if self.locations.get(bucket_index) == Some(location) {
                    log::error!("Bucket {bucket_index} points into missing data file at {location}");
                    return Err(crate::Error::Unrecoverable);
                }

                log::trace!("Data file of bucket {bucket_index} was compacted, retrying");
                continue;
            };

            let mut bucket = self.pool.get_bucket();
            self.load_bucket(&mut bucket, bucket_index, &bytes)?;

            return Ok(bucket.find_value(hash, key, not_found));
        }
    }

    /// Decodes a stored bucket image and checks its bucket index.
    pub(crate) fn load_bucket(
        &self,
        bucket: &mut Bucket,
        bucket_index: BucketIndex,
        bytes: &[u8],
    ) -> crate::Result<()> {
        bucket.read_from(bytes).inspect_err(|e| {
            log::error!("Could not decode bucket {bucket_index}: {e:?}");
        })?;

        if bucket.bucket_index() != Some(bucket_index) {
            log::error!(
                "Bucket {bucket_index} image carries bucket index {:?}",
                bucket.bucket_index(),
            );

            return Err(crate::Error::BucketMismatch {
                expected: bucket_index,
                got: bucket.bucket_index(),
            });
        }

        Ok(())
    }

    /// Opens a write cycle.
    ///
    /// # Panics
    ///
    /// Panics if a write cycle is already open, or the map is closed.
    pub fn start_writing(&self) {
        assert!(!self.is_closed(), "map is closed");

        let mut cycle = self.cycle.lock().expect("lock is poisoned");
        assert!(cycle.is_none(), "a write cycle is already open");

        log::trace!("Starting write cycle at {}", self.config.path.display());
        *cycle = Some(HashMap::default());
    }

    fn mutate(&self, key: &[u8], hash: KeyHash, expected_old: Option<Value>, value: Value) {
        assert!(!self.is_closed(), "map is closed");

        let bucket_index = self.bucket_index_of(hash);

        let mut cycle = self.cycle.lock().expect("lock is poisoned");

        let Some(mutations) = cycle.as_mut() else {
            panic!("not in a write cycle, call start_writing first");
        };

        match mutations.entry(bucket_index) {
            Entry::Occupied(mut entry) => match expected_old {
                Some(expected_old) => entry.get_mut().put_if_equal(key, hash, expected_old, value),
                None => entry.get_mut().put(key, hash, value),
            },
            Entry::Vacant(entry) => {
                entry.insert(match expected_old {
                    Some(expected_old) => {
                        BucketMutation::new_conditional(key, hash, expected_old, value)
                    }
                    None => BucketMutation::new(key, hash, value),
                });
            }
        }
    }

    /// Sets the value of a key in the open write cycle.
    ///
    /// # Panics
    ///
    /// Panics if no write cycle is open, or the value is a reserved sentinel.
    pub fn put(&self, key: &[u8], hash: KeyHash, value: Value) {
        assert!(!is_sentinel(value), "cannot store reserved value {value}");
        self.mutate(key, hash, None, value);
    }

    /// Sets the value of a key if its current value is `expected_old`.
    ///
    /// Passing [`INVALID_VALUE`](crate::INVALID_VALUE) as `expected_old` only inserts the key if it does
    /// not exist. A condition that does not hold is silently ignored.
    ///
    /// Within a write cycle, the condition is checked against the value pending in
    /// this cycle. A key's first write in a cycle is checked against the committed
    /// value when the cycle ends.
    ///
    /// # Panics
    ///
    /// Panics if no write cycle is open, or the value is a reserved sentinel.
    pub fn put_if_equal(&self, key: &[u8], hash: KeyHash, expected_old: Value, value: Value) {
        assert!(!is_sentinel(value), "cannot store reserved value {value}");
        assert_ne!(expected_old, DELETE_MARKER, "cannot expect reserved value");
        self.mutate(key, hash, Some(expected_old), value);
    }

    /// Deletes a key in the open write cycle.
    ///
    /// Deleting a key that does not exist is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if no write cycle is open.
    pub fn delete(&self, key: &[u8], hash: KeyHash) {
        self.mutate(key, hash, None, DELETE_MARKER);
    }

    /// Deletes a key if its current value is `expected_old`.
    ///
    /// # Panics
    ///
    /// Panics if no write cycle is open, or `expected_old` is a reserved sentinel.
    pub fn delete_if_equal(&self, key: &[u8], hash: KeyHash, expected_old: Value) {
        assert!(
            !is_sentinel(expected_old),
            "cannot expect reserved value {expected_old}"
        );
        self.mutate(key, hash, Some(expected_old), DELETE_MARKER);
    }

    /// Commits the open write cycle.
    ///
    /// Every touched bucket is rewritten into new data files, which are synced
    /// together with the new bucket index before the changes become visible.
    /// If anything fails, none of the cycle's changes become visible.
    /// The cycle is closed in either case.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if no write cycle is open.
    pub fn end_writing(&self) -> crate::Result<()> {
        let mutations = self
            .cycle
            .lock()
            .expect("lock is poisoned")
            .take()
            .expect("not in a write cycle, call start_writing first");

        if mutations.is_empty() {
            log::trace!("Write cycle has no mutations, nothing to flush");
            return Ok(());
        }

        let _lock = self.rollover_guard.lock().expect("lock is poisoned");

        if self.is_closed() {
            log::warn!("Map was closed while flushing, discarding write cycle");
            return Ok(());
        }

        self.flush(mutations)
    }

    /// Builds the next bucket index version from the current state,
    /// replacing some bucket locations.
    pub(crate) fn next_version(
        &self,
        data_files: Vec<(DataFileId, u64)>,
        changes: &[(BucketIndex, Option<DataLocation>)],
    ) -> IndexVersion {
        let changed = changes.iter().copied().collect::<HashMap<_, _>>();

        let mut locations = self
            .locations
            .live()
            .into_iter()
            .filter(|(bucket, _)| !changed.contains_key(bucket))
            .chain(
                changes
                    .iter()
                    .filter_map(|&(bucket, loc)| loc.map(|loc| (bucket, loc))),
            )
            .collect::<Vec<_>>();

        locations.sort_unstable_by_key(|(bucket, _)| *bucket);

        IndexVersion {
            bucket_count: self.bucket_count(),
            data_files,
            locations,
        }
    }

    /// Writes a self-contained copy of the committed state into a folder.
    ///
    /// Data files are hard-linked if possible. Opening a map at `path` yields the
    /// same results as this map at the time of the snapshot.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn snapshot<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = crate::path::absolute_path(path);

        let _lock = self.rollover_guard.lock().expect("lock is poisoned");

        assert!(!self.is_closed(), "map is closed");

        log::debug!(
            "Snapshotting map at {} into {}",
            self.config.path.display(),
            path.display(),
        );

        std::fs::create_dir_all(&path)?;

        let version = self.next_version(self.data_files.list_ids(), &[]);

        self.data_files.snapshot_files(&path.join(DATA_FOLDER))?;
        version.persist(&path)?;

        log::debug!(
            "Snapshot at {} done ({} data files, {} live buckets)",
            path.display(),
            version.data_files.len(),
            version.locations.len(),
        );

        Ok(())
    }

    /// Persists the bucket index and releases all files.
    ///
    /// A write cycle that is still open is discarded. Afterwards all lookups
    /// return `not_found` and all mutations panic. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn close(&self) -> crate::Result<()> {
        let _lock = self.rollover_guard.lock().expect("lock is poisoned");

        if self.is_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mutations) = self.cycle.lock().expect("lock is poisoned").take() {
            log::warn!(
                "Closing map with an open write cycle, discarding {} touched buckets",
                mutations.len(),
            );
        }

        let result = self
            .next_version(self.data_files.list_ids(), &[])
            .persist(&self.config.path);

        self.data_files.close();

        log::info!("Closed half-disk hash map at {}", self.config.path.display());

        result
    }
}
