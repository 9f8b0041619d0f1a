// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Hash code of a key, as computed by its [`KeySerializer`]
pub type KeyHash = i32;

/// How many bytes a serialized key takes up
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SerializedSize {
    /// Every key serializes to exactly this many bytes
    Fixed(usize),

    /// Size depends on the key
    Variable,
}

/// A key in its canonical byte form, together with its hash code
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializedKey {
    /// Canonical key bytes
    pub bytes: Vec<u8>,

    /// Hash code of the key
    pub hash: KeyHash,
}

/// Converts domain keys to and from the byte sequences stored in the map.
///
/// The map itself only ever sees bytes and hash codes, so it is agnostic to
/// what a key means. Two keys are the same key if and only if their bytes are equal,
/// and equal keys must produce equal hash codes.
pub trait KeySerializer<K> {
    /// Returns whether keys have a fixed serialized size.
    fn serialized_size(&self) -> SerializedSize;

    /// Serializes a key.
    fn to_bytes(&self, key: &K) -> Vec<u8>;

    /// Deserializes a key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the bytes are not a valid key.
    fn from_bytes(&self, bytes: &[u8]) -> Result<K, DecodeError>;

    /// Hash code of a key.
    fn hash_code(&self, key: &K) -> KeyHash;

    /// Serializes a key and computes its hash code.
    fn serialize(&self, key: &K) -> SerializedKey {
        SerializedKey {
            bytes: self.to_bytes(key),
            hash: self.hash_code(key),
        }
    }
}

/// Serializer for `u64` keys, such as leaf paths
#[derive(Copy, Clone, Debug, Default)]
pub struct LongKeySerializer;

impl KeySerializer<u64> for LongKeySerializer {
    fn serialized_size(&self) -> SerializedSize {
        SerializedSize::Fixed(std::mem::size_of::<u64>())
    }

    fn to_bytes(&self, key: &u64) -> Vec<u8> {
        key.to_le_bytes().to_vec()
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<u64, DecodeError> {
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| DecodeError::InvalidLength("LongKey"))?;

        Ok(u64::from_le_bytes(bytes))
    }

    // NOTE: Truncation is wanted, we fold the upper half into the lower half
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn hash_code(&self, key: &u64) -> KeyHash {
        (key ^ (key >> 32)) as i32
    }
}

/// Serializer for arbitrary byte string keys
#[derive(Copy, Clone, Debug, Default)]
pub struct BytesKeySerializer;

impl KeySerializer<Vec<u8>> for BytesKeySerializer {
    fn serialized_size(&self) -> SerializedSize {
        SerializedSize::Variable
    }

    fn to_bytes(&self, key: &Vec<u8>) -> Vec<u8> {
        key.clone()
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(bytes.to_vec())
    }

    // NOTE: Truncation is wanted
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn hash_code(&self, key: &Vec<u8>) -> KeyHash {
        xxhash_rust::xxh3::xxh3_64(key) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn long_key_roundtrip() -> Result<(), DecodeError> {
        let s = LongKeySerializer;

        for key in [0, 1, 255, 1 << 40, u64::MAX] {
            let serialized = s.serialize(&key);
            assert_eq!(8, serialized.bytes.len());
            assert_eq!(key, s.from_bytes(&serialized.bytes)?);
            assert_eq!(s.hash_code(&key), serialized.hash);
        }

        assert_eq!(SerializedSize::Fixed(8), s.serialized_size());
        assert!(matches!(
            s.from_bytes(b"abc"),
            Err(DecodeError::InvalidLength(_))
        ));

        Ok(())
    }

    #[test]
    fn long_key_hash_folds_upper_bits() {
        let s = LongKeySerializer;
        assert_ne!(s.hash_code(&1), s.hash_code(&((1 << 32) | 1)));
    }

    #[test]
    fn bytes_key_hash_is_stable() {
        let s = BytesKeySerializer;
        let a = s.serialize(&b"hello".to_vec());
        let b = s.serialize(&b"hello".to_vec());
        assert_eq!(a, b);
        assert_eq!(SerializedSize::Variable, s.serialized_size());
    }
}
