// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A persistent, disk-backed hash map from keys to 64-bit values ("half-disk hash map").
//!
//! ##### About
//!
//! This crate exports a `HalfDiskHashMap` that maps arbitrary byte keys to `i64` values.
//!
//! Keys are hashed into a fixed, power-of-two number of buckets. Only a small
//! array of bucket locations is kept in memory (one `u64` per bucket), while
//! the buckets themselves are stored in append-only data files on disk, hence "half-disk".
//!
//! Writes are batched into write cycles: a cycle buffers all mutations in memory,
//! grouped by bucket, and on commit rewrites every touched bucket into new data files.
//! The new bucket locations are persisted atomically before they become visible,
//! so a committed cycle survives a crash, and a failed cycle leaves no trace.
//!
//! Rewriting buckets leaves stale bucket images behind, so data files can be
//! periodically merged into fewer, denser files in a process called `Compaction`.
//! Lookups keep working while compaction runs.
//!
//! # Example usage
//!
//! ```
//! use half_disk_hashmap::{Config, KeySerializer, LongKeySerializer, INVALID_VALUE};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! // A map is a cheap handle that can be cloned and shared between threads
//! let map = Config::new(&folder).capacity(10_000).open()?;
//!
//! let key = LongKeySerializer.serialize(&42);
//!
//! map.start_writing();
//! map.put(&key.bytes, key.hash, 7);
//! map.end_writing()?;
//!
//! assert_eq!(7, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
//!
//! map.start_writing();
//! map.delete(&key.bytes, key.hash);
//! map.end_writing()?;
//!
//! assert_eq!(INVALID_VALUE, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
//!
//! // Merge data files, dropping stale bucket images
//! map.compactor().compact()?;
//!
//! map.close()?;
//! #
//! # Ok::<(), half_disk_hashmap::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]
#![warn(clippy::redundant_feature_names)]

#[doc(hidden)]
pub type HashMap<K, V> = std::collections::HashMap<K, V, rustc_hash::FxBuildHasher>;

pub(crate) type HashSet<K> = std::collections::HashSet<K, rustc_hash::FxBuildHasher>;

/// Buckets and their in-flight state
pub mod bucket;

#[doc(hidden)]
pub mod checksum;

#[doc(hidden)]
pub mod coding;

pub mod compaction;

/// Configuration
pub mod config;

#[doc(hidden)]
pub mod data_file;

mod error;

#[doc(hidden)]
pub mod file;

mod format_version;
mod key;

#[doc(hidden)]
pub mod locations;

mod map;
mod path;
mod value;

pub use {
    bucket::{
        mutation::BucketMutation,
        pool::{PooledBucket, ReusableBucketPool},
        Bucket, BucketIndex,
    },
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    compaction::{
        CompactionReport, CompactionStrategy, DataFileCompactor, DataFileStats, MajorCompaction,
        StaleThreshold,
    },
    config::Config,
    data_file::{DataFileCollection, DataLocation},
    error::{Error, Result},
    format_version::FormatVersion,
    key::{
        BytesKeySerializer, KeyHash, KeySerializer, LongKeySerializer, SerializedKey,
        SerializedSize,
    },
    map::HalfDiskHashMap,
    value::{is_sentinel, Value, DELETE_MARKER, INVALID_VALUE},
};
