// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::DataFileId;

const OFFSET_BITS: u32 = 40;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Largest data file ID a location can address
pub const MAX_DATA_FILE_ID: DataFileId = (1 << (u64::BITS - OFFSET_BITS)) - 1;

/// Largest byte offset a location can address
pub const MAX_OFFSET: u64 = OFFSET_MASK;

/// Points to an object inside a data file.
///
/// Packs the data file ID into the upper 24 bits and the byte offset into the
/// lower 40 bits of a `u64`. Data file IDs start at 1, so the raw value 0 never
/// is a valid location and is used for "no location".
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct DataLocation(u64);

impl DataLocation {
    /// Creates a location.
    ///
    /// # Panics
    ///
    /// Panics if the file ID is 0 or either component is out of range.
    #[must_use]
    pub fn new(file_id: DataFileId, offset: u64) -> Self {
        assert!(file_id > 0, "data file IDs start at 1");
        assert!(file_id <= MAX_DATA_FILE_ID, "data file ID out of range");
        assert!(offset <= MAX_OFFSET, "data file offset out of range");

        Self((file_id << OFFSET_BITS) | offset)
    }

    /// Parses a raw location, returning `None` for the "no location" value.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw >> OFFSET_BITS != 0).then_some(Self(raw))
    }

    /// Returns the raw value of an optional location.
    #[must_use]
    pub fn to_raw(location: Option<Self>) -> u64 {
        location.map_or(0, |x| x.0)
    }

    /// Data file ID
    #[must_use]
    pub fn file_id(self) -> DataFileId {
        self.0 >> OFFSET_BITS
    }

    /// Byte offset in the data file
    #[must_use]
    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }
}

impl std::fmt::Display for DataLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id(), self.offset())
    }
}
