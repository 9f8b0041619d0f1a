// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Pending writes of a write cycle
pub mod mutation;

/// Bounded pool of reusable buckets
pub mod pool;

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    value::{DELETE_MARKER, INVALID_VALUE},
    KeyHash, Value,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Position of a bucket in the map
pub type BucketIndex = u32;

/// On-disk bucket index of a bucket that has none assigned
const UNSET_BUCKET_INDEX: u32 = u32::MAX;

/// Bucket index + entry count
const BUCKET_HEADER_LEN: usize = std::mem::size_of::<u32>() * 2;

/// Smallest possible entry: hash + 1-byte key length + empty key + value
const MIN_ENTRY_LEN: usize = std::mem::size_of::<KeyHash>() + 1 + std::mem::size_of::<Value>();

#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    hash: KeyHash,
    value: Value,
    key_offset: usize,
    key_len: usize,
}

/// A bucket holds every entry whose key hashes to the same bucket index.
///
/// Entries are kept in insertion order. Key bytes of all entries live in one
/// growable buffer, in the same order as the entries, so a cleared bucket can be
/// reused without reallocating.
///
/// ##### Binary layout
///
/// ```text
/// [bucket index; u32]     u32::MAX when unset
/// [entry count;  u32]
/// for each entry:
///   [key hash;   i32]
///   [key length; varint u32]
///   [key bytes;  key length]
///   [value;      i64]
/// ```
///
/// All integers are little endian.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bucket {
    index: Option<BucketIndex>,
    entries: Vec<Entry>,
    keys: Vec<u8>,
}

fn varint_len(x: u32) -> usize {
    let bits = (u32::BITS - x.leading_zeros()).max(1);
    bits.div_ceil(7) as usize
}

impl Bucket {
    /// Creates an empty bucket without a bucket index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the bucket index.
    ///
    /// # Panics
    ///
    /// Panics if the index is the reserved "unset" value.
    pub fn set_bucket_index(&mut self, index: BucketIndex) {
        assert_ne!(index, UNSET_BUCKET_INDEX, "bucket index is reserved");
        self.index = Some(index);
    }

    /// Returns the bucket index, if one is assigned.
    #[must_use]
    pub fn bucket_index(&self) -> Option<BucketIndex> {
        self.index
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bucket has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resets the bucket to the empty state, keeping allocated storage.
    pub fn clear(&mut self) {
        self.index = None;
        self.entries.clear();
        self.keys.clear();
    }

    // NOTE: Key offsets always point into the key buffer
    #[allow(clippy::indexing_slicing)]
    fn key_of(&self, entry: &Entry) -> &[u8] {
        &self.keys[entry.key_offset..(entry.key_offset + entry.key_len)]
    }

    fn position(&self, hash: KeyHash, key: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.hash == hash && self.key_of(e) == key)
    }

    /// Iterates over all entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (KeyHash, &[u8], Value)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.hash, self.key_of(e), e.value))
    }

    /// Looks up the value of a key.
    ///
    /// Returns `not_found` if no entry has both the same hash code and the same key bytes.
    #[must_use]
    pub fn find_value(&self, hash: KeyHash, key: &[u8], not_found: Value) -> Value {
        self.position(hash, key)
            .and_then(|idx| self.entries.get(idx))
            .map_or(not_found, |e| e.value)
    }

    /// Inserts or overwrites the value of a key.
    ///
    /// Passing [`DELETE_MARKER`] removes the entry, if it exists.
    pub fn put_value(&mut self, key: &[u8], hash: KeyHash, value: Value) {
        match self.position(hash, key) {
            Some(idx) if value == DELETE_MARKER => self.remove(idx),
            Some(idx) => self.set_value(idx, value),
            None if value == DELETE_MARKER => {}
            None => self.append(key, hash, value),
        }
    }

    /// Like [`Bucket::put_value`], but only if the current value equals `expected_old`.
    ///
    /// An absent key counts as having the value [`INVALID_VALUE`], so passing
    /// it as `expected_old` inserts the key only if it does not yet exist.
    ///
    /// A mismatch is silently ignored.
    pub fn put_value_if_equal(
        &mut self,
        key: &[u8],
        hash: KeyHash,
        expected_old: Value,
        value: Value,
    ) {
        match self.position(hash, key) {
            Some(idx) => {
                let matches = self.entries.get(idx).is_some_and(|e| e.value == expected_old);

                if matches {
                    if value == DELETE_MARKER {
                        self.remove(idx);
                    } else {
                        self.set_value(idx, value);
                    }
                }
            }
            None => {
                if expected_old == INVALID_VALUE && value != DELETE_MARKER {
                    self.append(key, hash, value);
                }
            }
        }
    }

    fn set_value(&mut self, idx: usize, value: Value) {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.value = value;
        }
    }

    fn append(&mut self, key: &[u8], hash: KeyHash, value: Value) {
        assert!(u32::try_from(key.len()).is_ok(), "key is too large");

        self.entries.push(Entry {
            hash,
            value,
            key_offset: self.keys.len(),
            key_len: key.len(),
        });
        self.keys.extend_from_slice(key);
    }

    fn remove(&mut self, idx: usize) {
        let removed = self.entries.remove(idx);

        self.keys
            .drain(removed.key_offset..(removed.key_offset + removed.key_len));

        // NOTE: Keys are stored in entry order, so only later entries move
        for entry in self.entries.iter_mut().skip(idx) {
            entry.key_offset -= removed.key_len;
        }
    }

    /// Returns the exact number of bytes [`Bucket::write_to`] writes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        BUCKET_HEADER_LEN
            + self
                .entries
                .iter()
                .map(|e| {
                    // NOTE: Key length is checked to fit into u32 on insert
                    #[allow(clippy::cast_possible_truncation)]
                    let varint = varint_len(e.key_len as u32);

                    std::mem::size_of::<KeyHash>()
                        + varint
                        + e.key_len
                        + std::mem::size_of::<Value>()
                })
                .sum::<usize>()
    }

    /// Serializes the bucket.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.encode_into(writer)
    }

    /// Replaces the contents of this bucket with a serialized bucket.
    ///
    /// The whole slice must be exactly one bucket.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the bytes are not a valid bucket. The bucket
    /// is left empty in that case.
    pub fn read_from(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = Cursor::new(bytes);

        let result = self.decode_into(&mut reader, bytes.len()).and_then(|()| {
            if reader.position() == bytes.len() as u64 {
                Ok(())
            } else {
                Err(DecodeError::InvalidLength("Bucket"))
            }
        });

        if result.is_err() {
            self.clear();
        }

        result
    }

    fn decode_into<R: Read>(&mut self, reader: &mut R, size_hint: usize) -> Result<(), DecodeError> {
        self.clear();

        let index = reader.read_u32::<LittleEndian>()?;
        self.index = (index != UNSET_BUCKET_INDEX).then_some(index);

        let entry_count = reader.read_u32::<LittleEndian>()? as usize;

        // NOTE: Do not trust the entry count to preallocate
        self.entries
            .reserve(entry_count.min(size_hint / MIN_ENTRY_LEN));

        for _ in 0..entry_count {
            let hash = reader.read_i32::<LittleEndian>()?;
            let key_len = reader.read_u32_varint()? as usize;

            let key_offset = self.keys.len();
            let read = reader
                .by_ref()
                .take(key_len as u64)
                .read_to_end(&mut self.keys)?;

            if read != key_len {
                return Err(DecodeError::InvalidLength("BucketEntryKey"));
            }

            let value = reader.read_i64::<LittleEndian>()?;

            self.entries.push(Entry {
                hash,
                value,
                key_offset,
                key_len,
            });
        }

        Ok(())
    }
}

impl Encode for Bucket {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.index.unwrap_or(UNSET_BUCKET_INDEX))?;

        // NOTE: Entry count is bounded by the key buffer, which is bounded by memory
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;

        for entry in &self.entries {
            writer.write_i32::<LittleEndian>(entry.hash)?;

            // NOTE: Key length is checked to fit into u32 on insert
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32_varint(entry.key_len as u32)?;

            writer.write_all(self.key_of(entry))?;
            writer.write_i64::<LittleEndian>(entry.value)?;
        }

        Ok(())
    }
}

impl Decode for Bucket {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut bucket = Self::new();
        bucket.decode_into(reader, 0)?;
        Ok(bucket)
    }
}
