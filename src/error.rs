// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    BucketIndex, Checksum, FormatVersion,
};

/// Represents errors that can occur in the half-disk hash map
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Invalid or unparseable data format version
    InvalidVersion(Option<FormatVersion>),

    /// Some required data files could not be recovered from disk
    Unrecoverable,

    /// Invalid checksum value
    ChecksumMismatch {
        /// Checksum of the bytes that were read
        got: Checksum,

        /// Checksum that was stored alongside the bytes
        expected: Checksum,
    },

    /// A stored bucket image carries a different bucket index than
    /// the slot that points to it
    BucketMismatch {
        /// Bucket index that was looked up
        expected: BucketIndex,

        /// Bucket index found in the stored image
        got: Option<BucketIndex>,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HalfDiskHashMapError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Map result
pub type Result<T> = std::result::Result<T, Error>;
