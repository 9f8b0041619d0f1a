// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod collection;
mod id;

/// Packed data file ID and offset
pub mod location;

/// Data file writers
pub mod writer;

pub use {
    collection::DataFileCollection, id::DataFileIdCounter, location::DataLocation,
    writer::MultiWriter,
};

use crate::{Checksum, FormatVersion};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{Cursor, Read},
    path::PathBuf,
};

/// The unique identifier of a data file
pub type DataFileId = u64;

/// Magic bytes at the start of every data file
pub const DATA_FILE_MAGIC: &[u8] = b"HDF";

/// Magic + format version
pub const DATA_FILE_HEADER_LEN: usize = DATA_FILE_MAGIC.len() + 1;

/// Payload length + checksum
pub const RECORD_HEADER_LEN: usize = std::mem::size_of::<u32>() + std::mem::size_of::<u64>();

/// Metadata of a data file that was fully written and synced
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataFileMeta {
    /// Data file ID
    pub id: DataFileId,

    /// File path
    pub path: PathBuf,

    /// Number of objects in the file
    pub item_count: u64,

    /// File size in bytes
    pub file_size: u64,
}

/// An immutable, append-only file of stored objects (bucket images).
///
/// ##### Layout
///
/// ```text
/// [magic; 3B]
/// [format version; 1B]
/// for each object:
///   [payload length; u32]
///   [checksum; u64]       XXH3 of the payload
///   [payload; ?]
/// ```
#[derive(Debug)]
pub struct DataFile {
    /// Data file metadata
    pub meta: DataFileMeta,

    file: File,
}

impl DataFile {
    /// Opens a data file for reading and checks its header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the header is invalid.
    pub fn open(id: DataFileId, path: PathBuf, item_count: u64) -> crate::Result<Self> {
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let header = crate::file::read_exact(&file, 0, DATA_FILE_HEADER_LEN)?;
        let mut reader = Cursor::new(header);

        let mut magic = [0u8; DATA_FILE_MAGIC.len()];
        reader.read_exact(&mut magic)?;

        if magic != DATA_FILE_MAGIC {
            log::error!("Data file #{id} at {} has invalid magic bytes", path.display());
            return Err(crate::Error::Decode(
                crate::coding::DecodeError::InvalidHeader("DataFile"),
            ));
        }

        FormatVersion::parse(reader.read_u8()?)?;

        Ok(Self {
            meta: DataFileMeta {
                id,
                path,
                item_count,
                file_size,
            },
            file,
        })
    }

    /// Data file ID
    #[must_use]
    pub fn id(&self) -> DataFileId {
        self.meta.id
    }

    /// Reads the object stored at the given byte offset.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs or the checksum does not match.
    pub fn read_at(&self, offset: u64) -> crate::Result<Vec<u8>> {
        let header = crate::file::read_exact(&self.file, offset, RECORD_HEADER_LEN)?;
        let mut reader = Cursor::new(header);

        let len = reader.read_u32::<LittleEndian>()?;
        let expected = Checksum::from_raw(reader.read_u64::<LittleEndian>()?);

        let payload_offset = offset + RECORD_HEADER_LEN as u64;

        if payload_offset + u64::from(len) > self.meta.file_size {
            log::error!(
                "Object at {offset} in data file #{} runs past the end of the file",
                self.id(),
            );
            return Err(crate::Error::Decode(
                crate::coding::DecodeError::InvalidLength("DataFileRecord"),
            ));
        }

        let payload = crate::file::read_exact(&self.file, payload_offset, len as usize)?;

        Checksum::of(&payload).check(expected).inspect_err(|_| {
            log::error!(
                "Checksum mismatch for object at {offset} in data file #{}",
                self.id(),
            );
        })?;

        Ok(payload)
    }
}
