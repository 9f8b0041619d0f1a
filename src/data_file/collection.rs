// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    writer::remove_file_logged, DataFile, DataFileId, DataFileIdCounter, DataLocation, MultiWriter,
};
use crate::HashMap;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

/// The set of live data files of a map.
///
/// Objects are only ever appended to new files. The list of live files is
/// persisted by the caller (as part of the bucket index file), so a file that is
/// not registered yet is invisible to readers and is deleted on recovery.
pub struct DataFileCollection {
    folder: PathBuf,
    target_size: u64,
    id_generator: DataFileIdCounter,
    files: RwLock<HashMap<DataFileId, Arc<DataFile>>>,
}

impl std::fmt::Debug for DataFileCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataFileCollection({})", self.folder.display())
    }
}

impl DataFileCollection {
    /// Creates a new empty collection in a folder.
    pub(crate) fn create_new<P: Into<PathBuf>>(folder: P, target_size: u64) -> crate::Result<Self> {
        let folder = folder.into();
        log::trace!("Creating data file folder at {}", folder.display());

        std::fs::create_dir_all(&folder)?;

        if let Some(parent) = folder.parent() {
            crate::file::fsync_directory(parent)?;
        }

        Ok(Self {
            folder,
            target_size,
            id_generator: DataFileIdCounter::default(),
            files: RwLock::new(HashMap::default()),
        })
    }

    /// Opens the given data files, deleting any other file in the folder.
    pub(crate) fn recover<P: Into<PathBuf>>(
        folder: P,
        ids: &[(DataFileId, u64)],
        target_size: u64,
    ) -> crate::Result<Self> {
        let folder = folder.into();
        let cnt = ids.len();

        let progress_mod = match cnt {
            _ if cnt <= 20 => 1,
            _ if cnt <= 100 => 10,
            _ => 100,
        };

        log::debug!("Recovering {cnt} data files from {}", folder.display());

        if !folder.try_exists()? {
            if cnt > 0 {
                log::error!("Data file folder {} is missing", folder.display());
                return Err(crate::Error::Unrecoverable);
            }
            return Self::create_new(folder, target_size);
        }

        Self::remove_unfinished_files(&folder, ids)?;

        let mut files = HashMap::with_capacity_and_hasher(cnt, rustc_hash::FxBuildHasher);

        for (idx, &(id, item_count)) in ids.iter().enumerate() {
            let path = folder.join(id.to_string());

            if !path.try_exists()? {
                log::error!("Data file #{id} is missing at {}", path.display());
                return Err(crate::Error::Unrecoverable);
            }

            log::trace!("Recovering data file #{id} from {}", path.display());
            files.insert(id, Arc::new(DataFile::open(id, path, item_count)?));

            if idx % progress_mod == 0 {
                log::debug!("Recovered {idx}/{cnt} data files");
            }
        }

        let next_id = ids.iter().map(|&(id, _)| id).max().unwrap_or_default() + 1;

        log::debug!("Successfully recovered {} data files", files.len());

        Ok(Self {
            folder,
            target_size,
            id_generator: DataFileIdCounter::new(next_id),
            files: RwLock::new(files),
        })
    }

    fn remove_unfinished_files(folder: &Path, ids: &[(DataFileId, u64)]) -> crate::Result<()> {
        for dirent in std::fs::read_dir(folder)? {
            let dirent = dirent?;
            let file_name = dirent.file_name();

            // https://en.wikipedia.org/wiki/.DS_Store
            if file_name == ".DS_Store" {
                continue;
            }

            // https://en.wikipedia.org/wiki/AppleSingle_and_AppleDouble_formats
            if file_name.to_string_lossy().starts_with("._") {
                continue;
            }

            if !dirent.file_type()?.is_file() {
                continue;
            }

            let registered = file_name
                .to_str()
                .and_then(|x| x.parse::<DataFileId>().ok())
                .is_some_and(|id| ids.iter().any(|&(x, _)| x == id));

            if !registered {
                log::trace!("Deleting unfinished data file {}", dirent.path().display());
                std::fs::remove_file(dirent.path())?;
            }
        }

        Ok(())
    }

    /// Returns the folder the data files live in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.folder
    }

    /// Starts writing new data files.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn start_writing(&self) -> crate::Result<MultiWriter> {
        MultiWriter::new(&self.folder, self.target_size, self.id_generator.clone())
    }

    /// Makes data files visible to readers.
    pub(crate) fn register(&self, files: Vec<DataFile>) {
        let mut lock = self.files.write().expect("lock is poisoned");

        for file in files {
            log::debug!(
                "Registering data file #{} ({} objects, {} bytes)",
                file.id(),
                file.meta.item_count,
                file.meta.file_size,
            );
            lock.insert(file.id(), Arc::new(file));
        }
    }

    /// Removes data files from the collection and deletes them from disk.
    ///
    /// Readers that already hold one of the files can keep reading from it.
    pub(crate) fn drop_files(&self, ids: &[DataFileId]) {
        let dropped = {
            let mut lock = self.files.write().expect("lock is poisoned");
            ids.iter().filter_map(|id| lock.remove(id)).collect::<Vec<_>>()
        };

        for file in dropped {
            log::trace!("Deleting data file #{}", file.id());
            remove_file_logged(&file.meta.path);
        }
    }

    /// Removes all files from the collection without deleting them.
    pub(crate) fn close(&self) {
        self.files.write().expect("lock is poisoned").clear();
    }

    /// Gets a data file.
    #[must_use]
    pub fn get(&self, id: DataFileId) -> Option<Arc<DataFile>> {
        self.files.read().expect("lock is poisoned").get(&id).cloned()
    }

    /// Reads an object.
    ///
    /// Returns `None` if the location points into a file that is
    /// not (or no longer) part of the collection.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs or the object is corrupted.
    pub fn read_object(&self, location: DataLocation) -> crate::Result<Option<Vec<u8>>> {
        let Some(file) = self.get(location.file_id()) else {
            return Ok(None);
        };

        file.read_at(location.offset()).map(Some)
    }

    /// Lists all data files.
    #[must_use]
    pub fn list_files(&self) -> Vec<Arc<DataFile>> {
        let mut files = self
            .files
            .read()
            .expect("lock is poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();

        files.sort_by_key(|x| x.id());
        files
    }

    /// Lists all data file IDs with their object counts.
    #[must_use]
    pub fn list_ids(&self) -> Vec<(DataFileId, u64)> {
        self.list_files()
            .iter()
            .map(|x| (x.id(), x.meta.item_count))
            .collect()
    }

    /// Returns the number of data files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().expect("lock is poisoned").len()
    }

    /// Returns `true` if there are no data files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total size of all data files in bytes.
    #[must_use]
    pub fn disk_space(&self) -> u64 {
        self.files
            .read()
            .expect("lock is poisoned")
            .values()
            .map(|x| x.meta.file_size)
            .sum()
    }

    /// Links (or copies) all data files into another folder.
    pub(crate) fn snapshot_files(&self, target: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(target)?;

        for file in self.list_files() {
            let dst = target.join(file.id().to_string());
            log::trace!("Snapshotting data file #{} to {}", file.id(), dst.display());
            crate::file::link_or_copy(&file.meta.path, &dst)?;
        }

        crate::file::fsync_directory(target)?;

        Ok(())
    }
}
