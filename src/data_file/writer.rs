// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    location::{DataLocation, MAX_OFFSET},
    DataFileId, DataFileIdCounter, DataFileMeta, DATA_FILE_HEADER_LEN, DATA_FILE_MAGIC,
    RECORD_HEADER_LEN,
};
use crate::{Checksum, FormatVersion};
use byteorder::{LittleEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Data file writer
pub struct Writer {
    pub(crate) path: PathBuf,
    pub(crate) data_file_id: DataFileId,

    #[allow(clippy::struct_field_names)]
    active_writer: BufWriter<File>,

    offset: u64,
    pub(crate) item_count: u64,
}

impl Writer {
    /// Creates a new data file and writes its header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new<P: AsRef<Path>>(path: P, data_file_id: DataFileId) -> crate::Result<Self> {
        let path = path.as_ref();

        let file = File::create_new(path)?;
        let mut active_writer = BufWriter::new(file);

        active_writer.write_all(DATA_FILE_MAGIC)?;
        active_writer.write_u8(FormatVersion::V1.into())?;

        Ok(Self {
            path: path.into(),
            data_file_id,
            active_writer,
            offset: DATA_FILE_HEADER_LEN as u64,
            item_count: 0,
        })
    }

    /// Returns the current offset in the file.
    #[must_use]
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends an object, returning its location.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if the object is larger than 4 GiB, or the file outgrows what
    /// a location can address.
    pub fn store_object(&mut self, bytes: &[u8]) -> crate::Result<DataLocation> {
        assert!(u32::try_from(bytes.len()).is_ok(), "object is too large");
        assert!(self.offset <= MAX_OFFSET, "data file is too large");

        let location = DataLocation::new(self.data_file_id, self.offset);

        // NOTE: Truncation is okay, checked above
        #[allow(clippy::cast_possible_truncation)]
        self.active_writer
            .write_u32::<LittleEndian>(bytes.len() as u32)?;

        self.active_writer
            .write_u64::<LittleEndian>(Checksum::of(bytes).into_u64())?;

        self.active_writer.write_all(bytes)?;

        self.offset += (RECORD_HEADER_LEN + bytes.len()) as u64;
        self.item_count += 1;

        Ok(location)
    }

    /// Flushes and fsyncs the file.
    pub(crate) fn finish(mut self) -> crate::Result<DataFileMeta> {
        self.active_writer.flush()?;
        self.active_writer.get_mut().sync_all()?;

        Ok(DataFileMeta {
            id: self.data_file_id,
            path: self.path,
            item_count: self.item_count,
            file_size: self.offset,
        })
    }
}

/// Writes objects into one or more data files, starting a new
/// file whenever the current one reaches the target size
pub struct MultiWriter {
    folder: PathBuf,
    target_size: u64,
    id_generator: DataFileIdCounter,

    active: Writer,
    finished: Vec<DataFileMeta>,
}

impl MultiWriter {
    /// Starts writing into a new data file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new<P: AsRef<Path>>(
        folder: P,
        target_size: u64,
        id_generator: DataFileIdCounter,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref();
        let active = Self::create_writer(folder, &id_generator)?;

        Ok(Self {
            folder: folder.into(),
            target_size,
            id_generator,
            active,
            finished: vec![],
        })
    }

    fn create_writer(folder: &Path, id_generator: &DataFileIdCounter) -> crate::Result<Writer> {
        let id = id_generator.next(folder)?;

        let path = folder.join(id.to_string());
        log::trace!("Creating data file #{id} at {}", path.display());

        Writer::new(path, id)
    }

    fn rotate(&mut self) -> crate::Result<()> {
        log::trace!(
            "Data file #{} reached {} bytes, rotating",
            self.active.data_file_id,
            self.active.offset(),
        );

        let next = Self::create_writer(&self.folder, &self.id_generator)?;
        let prev = std::mem::replace(&mut self.active, next);
        let prev_path = prev.path.clone();

        match prev.finish() {
            Ok(meta) => {
                self.finished.push(meta);
                Ok(())
            }
            Err(e) => {
                remove_file_logged(&prev_path);
                Err(e)
            }
        }
    }

    /// Appends an object, returning its location.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn store_object(&mut self, bytes: &[u8]) -> crate::Result<DataLocation> {
        if self.active.item_count > 0 && self.active.offset() >= self.target_size {
            self.rotate()?;
        }

        self.active.store_object(bytes)
    }

    /// Returns the paths of all files written so far.
    fn paths(&self) -> Vec<PathBuf> {
        self.finished
            .iter()
            .map(|x| x.path.clone())
            .chain(std::iter::once(self.active.path.clone()))
            .collect()
    }

    /// Deletes everything that was written.
    pub fn abort(self) {
        for path in self.paths() {
            remove_file_logged(&path);
        }
    }

    /// Syncs all files to disk.
    ///
    /// Files without any objects are deleted instead. If syncing fails,
    /// all files that were written are deleted.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn finish(self) -> crate::Result<Vec<DataFileMeta>> {
        let paths = self.paths();
        let mut finished = self.finished;

        let result = self.active.finish().and_then(|last| {
            finished.push(last);

            let (written, empty): (Vec<_>, Vec<_>) =
                finished.into_iter().partition(|x| x.item_count > 0);

            for meta in empty {
                log::debug!(
                    "Data file #{} has no objects, deleting empty file at {}",
                    meta.id,
                    meta.path.display(),
                );
                remove_file_logged(&meta.path);
            }

            if let Some(folder) = paths.first().and_then(|x| x.parent()) {
                crate::file::fsync_directory(folder)?;
            }

            Ok(written)
        });

        if result.is_err() {
            for path in &paths {
                remove_file_logged(path);
            }
        }

        result
    }
}

pub(crate) fn remove_file_logged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not delete data file at {}: {e:?}", path.display());
        }
    }
}
