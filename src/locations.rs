// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bucket::BucketIndex,
    coding::{Decode, DecodeError, Encode, EncodeError},
    data_file::{DataFileId, DataLocation},
    file::{rewrite_atomic, BUCKET_INDEX_FILE},
    Checksum, FormatVersion,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Cursor, Read, Write},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

/// Magic bytes at the start of the bucket index file
pub const BUCKET_INDEX_MAGIC: &[u8] = b"HDI";

/// In-memory mapping of bucket index to the location of its latest image
///
/// Every bucket has one atomic slot, so readers never take a lock.
/// A raw value of 0 means the bucket does not exist (is empty).
pub struct BucketLocations {
    slots: Box<[AtomicU64]>,
}

impl std::fmt::Debug for BucketLocations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BucketLocations(len={})", self.slots.len())
    }
}

impl BucketLocations {
    /// Creates a table where every bucket is empty.
    #[must_use]
    pub fn new(bucket_count: u32) -> Self {
        let slots = (0..bucket_count).map(|_| AtomicU64::new(0)).collect();
        Self { slots }
    }

    fn slot(&self, bucket: BucketIndex) -> &AtomicU64 {
        self.slots
            .get(bucket as usize)
            .unwrap_or_else(|| panic!("bucket index {bucket} out of bounds"))
    }

    /// Number of buckets
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn bucket_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Loads the current location of a bucket.
    #[must_use]
    pub fn get(&self, bucket: BucketIndex) -> Option<DataLocation> {
        DataLocation::from_raw(self.slot(bucket).load(Ordering::Acquire))
    }

    /// Publishes a new location for a bucket.
    pub fn set(&self, bucket: BucketIndex, location: Option<DataLocation>) {
        self.slot(bucket)
            .store(DataLocation::to_raw(location), Ordering::Release);
    }

    /// Publishes a new location only if the bucket still points at `expected`.
    ///
    /// Returns `true` if the location was replaced.
    pub fn compare_and_set(
        &self,
        bucket: BucketIndex,
        expected: Option<DataLocation>,
        location: Option<DataLocation>,
    ) -> bool {
        self.slot(bucket)
            .compare_exchange(
                DataLocation::to_raw(expected),
                DataLocation::to_raw(location),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns all buckets that currently exist, in bucket order.
    #[must_use]
    pub fn live(&self) -> Vec<(BucketIndex, DataLocation)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                #[allow(clippy::cast_possible_truncation)]
                let idx = idx as BucketIndex;
                DataLocation::from_raw(slot.load(Ordering::Acquire)).map(|loc| (idx, loc))
            })
            .collect()
    }
}

/// A persisted version of the bucket index
///
/// The file list and the bucket locations are written together,
/// so every version on disk is self-consistent.
///
/// ##### Layout
///
/// ```text
/// [magic; 3B]            written by `persist`
/// [format version; 1B]   written by `persist`
/// [bucket count; u32]
/// [data file count; u32]
/// data file * data file count:
///   [id; u64]
///   [object count; u64]
/// [location count; u32]
/// location * location count:
///   [bucket index; u32]
///   [location; u64]
/// [checksum; u64]        XXH3 of everything before, written by `persist`
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexVersion {
    /// Number of buckets, always a power of two
    pub bucket_count: u32,

    /// Live data files with their object counts
    pub data_files: Vec<(DataFileId, u64)>,

    /// Locations of all existing buckets, sorted by bucket index
    pub locations: Vec<(BucketIndex, DataLocation)>,
}

impl IndexVersion {
    /// Writes this version to `<folder>/bucket_index`, replacing the previous one atomically.
    pub(crate) fn persist(&self, folder: &Path) -> crate::Result<()> {
        log::trace!(
            "Persisting bucket index with {} data files, {} buckets in {}",
            self.data_files.len(),
            self.locations.len(),
            folder.display(),
        );

        let mut bytes = Vec::with_capacity(
            40 + self.data_files.len() * 16 + self.locations.len() * 12,
        );

        bytes.write_all(BUCKET_INDEX_MAGIC)?;
        bytes.write_u8(FormatVersion::V1.into())?;
        self.encode_into(&mut bytes)?;

        let checksum = Checksum::of(&bytes);
        bytes.write_u64::<LittleEndian>(checksum.into_u64())?;

        rewrite_atomic(&folder.join(BUCKET_INDEX_FILE), &bytes)?;

        Ok(())
    }

    /// Loads the bucket index file from a folder, if it exists.
    pub(crate) fn load(folder: &Path) -> crate::Result<Option<Self>> {
        let path = folder.join(BUCKET_INDEX_FILE);

        if !path.try_exists()? {
            return Ok(None);
        }

        log::debug!("Loading bucket index from {}", path.display());

        let bytes = std::fs::read(&path)?;

        if bytes.len() < std::mem::size_of::<u64>() {
            return Err(crate::Error::Decode(DecodeError::InvalidLength(
                "BucketIndexFile",
            )));
        }

        let (content, mut checksum) = bytes.split_at(bytes.len() - std::mem::size_of::<u64>());
        let expected = Checksum::from_raw(checksum.read_u64::<LittleEndian>()?);

        Checksum::of(content).check(expected).inspect_err(|_| {
            log::error!("Bucket index file {} is corrupted", path.display());
        })?;

        let mut reader = Cursor::new(content);

        let mut magic = [0u8; BUCKET_INDEX_MAGIC.len()];
        reader.read_exact(&mut magic)?;

        if magic != BUCKET_INDEX_MAGIC {
            log::error!("Bucket index file {} has invalid magic bytes", path.display());
            return Err(crate::Error::Decode(DecodeError::InvalidHeader(
                "BucketIndexFile",
            )));
        }

        FormatVersion::parse(reader.read_u8()?)?;

        let version = Self::decode_from(&mut reader)?;

        if reader.position() != content.len() as u64 {
            return Err(crate::Error::Decode(DecodeError::InvalidLength(
                "BucketIndexFile",
            )));
        }

        Ok(Some(version))
    }
}

impl Encode for IndexVersion {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.bucket_count)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.data_files.len() as u32)?;

        for &(id, item_count) in &self.data_files {
            writer.write_u64::<LittleEndian>(id)?;
            writer.write_u64::<LittleEndian>(item_count)?;
        }

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.locations.len() as u32)?;

        for &(bucket, location) in &self.locations {
            writer.write_u32::<LittleEndian>(bucket)?;
            writer.write_u64::<LittleEndian>(DataLocation::to_raw(Some(location)))?;
        }

        Ok(())
    }
}

impl Decode for IndexVersion {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let bucket_count = reader.read_u32::<LittleEndian>()?;

        if !bucket_count.is_power_of_two() {
            return Err(DecodeError::InvalidHeader("BucketCount"));
        }

        let file_count = reader.read_u32::<LittleEndian>()?;
        let mut data_files = Vec::new();

        for _ in 0..file_count {
            let id = reader.read_u64::<LittleEndian>()?;
            let item_count = reader.read_u64::<LittleEndian>()?;
            data_files.push((id, item_count));
        }

        let location_count = reader.read_u32::<LittleEndian>()?;
        let mut locations = Vec::new();

        for _ in 0..location_count {
            let bucket = reader.read_u32::<LittleEndian>()?;

            if bucket >= bucket_count {
                return Err(DecodeError::InvalidLength("BucketIndex"));
            }

            let location = DataLocation::from_raw(reader.read_u64::<LittleEndian>()?)
                .ok_or(DecodeError::InvalidHeader("DataLocation"))?;

            locations.push((bucket, location));
        }

        Ok(Self {
            bucket_count,
            data_files,
            locations,
        })
    }
}
