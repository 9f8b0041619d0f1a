// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Value stored for a key
pub type Value = i64;

/// Returned for keys that do not exist, and used as the expected old value
/// of a conditional write that should only insert
pub const INVALID_VALUE: Value = i64::MIN;

/// Marks a pending delete inside a write cycle
pub const DELETE_MARKER: Value = i64::MIN + 1;

/// Returns `true` if the value is one of the reserved sentinels.
#[must_use]
pub fn is_sentinel(value: Value) -> bool {
    value == INVALID_VALUE || value == DELETE_MARKER
}
