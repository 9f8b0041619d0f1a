// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    value::{DELETE_MARKER, INVALID_VALUE},
    HashMap, KeyHash, Value,
};

#[derive(Debug)]
struct PendingWrite {
    key: Box<[u8]>,
    hash: KeyHash,
    old_value: Option<Value>,
    value: Value,
}

/// Pending writes to a single bucket during one write cycle.
///
/// Each distinct key is stored once. The last unconditional write
/// to a key wins, and a conditional write is checked against the value that is
/// pending for the key, not against what is on disk.
///
/// If a key's first write was conditional, its expected old value is kept as a
/// hint and checked against the stored bucket when the cycle is flushed.
#[derive(Debug)]
pub struct BucketMutation {
    writes: Vec<PendingWrite>,
    positions: HashMap<Box<[u8]>, usize>,
}

impl BucketMutation {
    /// Starts a chain with an unconditional write.
    #[must_use]
    pub fn new(key: &[u8], hash: KeyHash, value: Value) -> Self {
        let mut mutation = Self::empty();
        mutation.push(key, hash, None, value);
        mutation
    }

    /// Starts a chain with a conditional write.
    #[must_use]
    pub fn new_conditional(key: &[u8], hash: KeyHash, expected_old: Value, value: Value) -> Self {
        let mut mutation = Self::empty();
        mutation.push(key, hash, Some(expected_old), value);
        mutation
    }

    fn empty() -> Self {
        Self {
            writes: Vec::with_capacity(1),
            positions: HashMap::default(),
        }
    }

    fn push(&mut self, key: &[u8], hash: KeyHash, old_value: Option<Value>, value: Value) {
        let key: Box<[u8]> = key.into();

        self.positions.insert(key.clone(), self.writes.len());
        self.writes.push(PendingWrite {
            key,
            hash,
            old_value,
            value,
        });
    }

    fn get_mut(&mut self, key: &[u8]) -> Option<&mut PendingWrite> {
        let idx = *self.positions.get(key)?;
        self.writes.get_mut(idx)
    }

    /// Sets the pending value of a key, discarding any old value expectation.
    pub fn put(&mut self, key: &[u8], hash: KeyHash, value: Value) {
        if let Some(write) = self.get_mut(key) {
            debug_assert_eq!(write.hash, hash, "same key with different hash codes");

            write.value = value;
            write.old_value = None;
        } else {
            self.push(key, hash, None, value);
        }
    }

    /// Sets the pending value of a key if the currently pending value is `expected_old`.
    ///
    /// A pending delete compares equal to [`INVALID_VALUE`], the same as an absent key.
    ///
    /// The first write to a key in a chain always succeeds here and records
    /// `expected_old`, to be checked against the stored bucket on flush.
    pub fn put_if_equal(&mut self, key: &[u8], hash: KeyHash, expected_old: Value, value: Value) {
        if let Some(write) = self.get_mut(key) {
            debug_assert_eq!(write.hash, hash, "same key with different hash codes");

            let current = if write.value == DELETE_MARKER {
                INVALID_VALUE
            } else {
                write.value
            };

            if current == expected_old {
                write.value = value;
            }
        } else {
            self.push(key, hash, Some(expected_old), value);
        }
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn size(&self) -> usize {
        self.writes.len()
    }

    /// Returns the pending value of a key, if the key was written in this chain.
    #[must_use]
    pub fn pending_value(&self, key: &[u8]) -> Option<Value> {
        let idx = *self.positions.get(key)?;
        self.writes.get(idx).map(|w| w.value)
    }

    /// Visits every key once, in the order keys were first written,
    /// passing `(key, hash, old value hint, value)`.
    pub fn for_each_key_value<F: FnMut(&[u8], KeyHash, Option<Value>, Value)>(&self, mut visitor: F) {
        for write in &self.writes {
            visitor(&write.key, write.hash, write.old_value, write.value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    fn collect(m: &BucketMutation) -> Vec<(Vec<u8>, KeyHash, Option<Value>, Value)> {
        let mut v = vec![];
        m.for_each_key_value(|k, h, o, x| v.push((k.to_vec(), h, o, x)));
        v
    }

    #[test]
    fn mutation_put_collapses_same_key() {
        let mut m = BucketMutation::new(b"a", 1, 1);
        m.put(b"b", 2, 2);
        m.put(b"a", 1, 3);
        m.put(b"c", 3, 4);

        assert_eq!(3, m.size());
        assert_eq!(
            vec![
                (b"a".to_vec(), 1, None, 3),
                (b"b".to_vec(), 2, None, 2),
                (b"c".to_vec(), 3, None, 4),
            ],
            collect(&m)
        );
    }

    #[test]
    fn mutation_conditional_race() {
        let mut m = BucketMutation::new(b"x", 0, 100);

        const X: Value = 10;
        const Y: Value = 20;
        const Z: Value = 30;
        const W: Value = 40;

        m.put_if_equal(b"k", 7, X, Y);
        m.put(b"k", 7, Z);
        m.put_if_equal(b"k", 7, Y, W);

        assert_eq!(Some(Z), m.pending_value(b"k"));
        assert_eq!(2, m.size());

        let writes = collect(&m);
        assert_eq!((b"k".to_vec(), 7, None, Z), writes[1]);
    }

    #[test]
    fn mutation_conditional_against_pending() {
        let mut m = BucketMutation::new_conditional(b"k", 7, INVALID_VALUE, 1);

        // Checked against pending value 1, not against what is on disk
        m.put_if_equal(b"k", 7, 5, 2);
        assert_eq!(Some(1), m.pending_value(b"k"));

        m.put_if_equal(b"k", 7, 1, 2);
        assert_eq!(Some(2), m.pending_value(b"k"));

        // The original expectation is kept for the flush
        assert_eq!(vec![(b"k".to_vec(), 7, Some(INVALID_VALUE), 2)], collect(&m));
    }

    #[test]
    fn mutation_delete_then_put() {
        let mut m = BucketMutation::new(b"a", 1, 5);
        m.put(b"a", 1, DELETE_MARKER);
        assert_eq!(Some(DELETE_MARKER), m.pending_value(b"a"));

        m.put(b"a", 1, 6);
        assert_eq!(Some(6), m.pending_value(b"a"));
        assert_eq!(1, m.size());
        assert_eq!(None, m.pending_value(b"nope"));
    }

    #[test]
    fn mutation_conditional_after_pending_delete() {
        let mut m = BucketMutation::new(b"a", 1, 5);
        m.put(b"a", 1, DELETE_MARKER);

        m.put_if_equal(b"a", 1, 5, 6);
        assert_eq!(Some(DELETE_MARKER), m.pending_value(b"a"));

        m.put_if_equal(b"a", 1, INVALID_VALUE, 7);
        assert_eq!(Some(7), m.pending_value(b"a"));
        assert_eq!(vec![(b"a".to_vec(), 1, None, 7)], collect(&m));
    }

    #[test]
    fn mutation_many_keys_first_seen_order() {
        let mut m = BucketMutation::new(b"key-0", 0, 0);

        for i in 1..500_i64 {
            m.put(format!("key-{i}").as_bytes(), 0, i);
        }
        for i in (0..500_i64).rev() {
            m.put(format!("key-{i}").as_bytes(), 0, i * 2);
        }

        assert_eq!(500, m.size());

        let writes = collect(&m);
        for (i, (key, _, _, value)) in writes.into_iter().enumerate() {
            assert_eq!(format!("key-{i}").into_bytes(), key);
            assert_eq!(i as i64 * 2, value);
        }
    }
}
