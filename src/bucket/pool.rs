// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Bucket;
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
};

/// Creates buckets for a [`ReusableBucketPool`]
pub type BucketFactory = Box<dyn Fn() -> Bucket + Send + Sync>;

struct PoolState {
    /// Cleared buckets ready to be handed out
    available: Vec<Bucket>,

    /// Number of buckets currently lent out
    checked_out: usize,

    /// Tickets of blocked callers, oldest first
    waiters: VecDeque<u64>,

    next_ticket: u64,
}

struct PoolInner {
    capacity: usize,
    factory: BucketFactory,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// A bounded pool of reusable buckets.
///
/// At most `capacity` buckets are lent out at any time. Buckets are created on
/// demand, so the pool starts out empty. When all buckets are lent out,
/// [`ReusableBucketPool::get_bucket`] blocks until one comes back; blocked callers are
/// served in arrival order.
#[derive(Clone)]
pub struct ReusableBucketPool(Arc<PoolInner>);

impl std::fmt::Debug for ReusableBucketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ReusableBucketPool(capacity={}, checked_out={})",
            self.0.capacity,
            self.checked_out()
        )
    }
}

impl ReusableBucketPool {
    /// Creates a pool that lends out at most `capacity` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new<F: Fn() -> Bucket + Send + Sync + 'static>(capacity: usize, factory: F) -> Self {
        assert!(capacity > 0, "bucket pool needs to hold at least one bucket");

        Self(Arc::new(PoolInner {
            capacity,
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                available: Vec::with_capacity(capacity),
                checked_out: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            released: Condvar::new(),
        }))
    }

    /// Returns the maximum number of buckets that can be lent out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    /// Returns the number of buckets currently lent out.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.0.state.lock().expect("lock is poisoned").checked_out
    }

    /// Takes a bucket from the pool, blocking until one is available.
    ///
    /// The bucket is empty and has no bucket index. It goes back to the pool
    /// when the returned guard is dropped.
    #[must_use]
    pub fn get_bucket(&self) -> PooledBucket {
        let inner = &self.0;
        let mut state = inner.state.lock().expect("lock is poisoned");

        if state.checked_out >= inner.capacity || !state.waiters.is_empty() {
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(ticket);

            while state.checked_out >= inner.capacity || state.waiters.front() != Some(&ticket) {
                state = inner.released.wait(state).expect("lock is poisoned");
            }

            state.waiters.pop_front();

            // NOTE: Several buckets may have come back while we were waiting
            if state.checked_out + 1 < inner.capacity && !state.waiters.is_empty() {
                inner.released.notify_all();
            }
        }

        state.checked_out += 1;
        let bucket = state.available.pop();
        drop(state);

        let bucket = bucket.unwrap_or_else(|| (inner.factory)());
        debug_assert!(bucket.is_empty());

        PooledBucket {
            bucket: Some(bucket),
            pool: self.clone(),
        }
    }

    /// Returns a bucket to the pool.
    ///
    /// Same as dropping the guard.
    ///
    /// # Panics
    ///
    /// Panics if the bucket was lent out by a different pool.
    pub fn release_bucket(&self, bucket: PooledBucket) {
        assert!(
            Arc::ptr_eq(&self.0, &bucket.pool.0),
            "bucket does not belong to this pool"
        );
        drop(bucket);
    }

    fn put_back(&self, mut bucket: Bucket) {
        bucket.clear();

        let mut state = self.0.state.lock().expect("lock is poisoned");
        debug_assert!(state.checked_out > 0);

        state.checked_out -= 1;
        state.available.push(bucket);
        drop(state);

        // NOTE: Only the oldest waiter may proceed, so everyone needs to check
        self.0.released.notify_all();
    }
}

/// A bucket lent out by a [`ReusableBucketPool`]
pub struct PooledBucket {
    bucket: Option<Bucket>,
    pool: ReusableBucketPool,
}

impl std::ops::Deref for PooledBucket {
    type Target = Bucket;

    #[expect(clippy::expect_used, reason = "only taken on drop")]
    fn deref(&self) -> &Self::Target {
        self.bucket.as_ref().expect("bucket should exist")
    }
}

impl std::ops::DerefMut for PooledBucket {
    #[expect(clippy::expect_used, reason = "only taken on drop")]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bucket.as_mut().expect("bucket should exist")
    }
}

impl Drop for PooledBucket {
    fn drop(&mut self) {
        if let Some(bucket) = self.bucket.take() {
            self.pool.put_back(bucket);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        time::Duration,
    };
    use test_log::test;

    fn counting_pool(capacity: usize) -> (ReusableBucketPool, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::default());

        let pool = {
            let created = created.clone();
            ReusableBucketPool::new(capacity, move || {
                created.fetch_add(1, Ordering::Relaxed);
                Bucket::new()
            })
        };

        (pool, created)
    }

    #[test]
    fn pool_reuse() {
        let (pool, created) = counting_pool(2);
        assert_eq!(0, created.load(Ordering::Relaxed));

        {
            let mut bucket = pool.get_bucket();
            bucket.set_bucket_index(4);
            bucket.put_value(b"a", 1, 1);
            assert_eq!(1, pool.checked_out());
        }
        assert_eq!(0, pool.checked_out());

        let bucket = pool.get_bucket();
        assert!(bucket.is_empty());
        assert_eq!(None, bucket.bucket_index());
        assert_eq!(1, created.load(Ordering::Relaxed));

        pool.release_bucket(bucket);
        assert_eq!(0, pool.checked_out());
    }

    #[test]
    #[should_panic = "does not belong"]
    fn pool_release_foreign() {
        let a = ReusableBucketPool::new(1, Bucket::new);
        let b = ReusableBucketPool::new(1, Bucket::new);

        let bucket = b.get_bucket();
        a.release_bucket(bucket);
    }

    #[test]
    #[should_panic = "at least one bucket"]
    fn pool_zero_capacity() {
        let _ = ReusableBucketPool::new(0, Bucket::new);
    }

    #[test]
    fn pool_blocks_when_exhausted() {
        let (pool, _) = counting_pool(3);

        let mut held = (0..3).map(|_| pool.get_bucket()).collect::<Vec<_>>();
        assert_eq!(3, pool.checked_out());

        let (tx, rx) = mpsc::channel();

        let handle = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let bucket = pool.get_bucket();
                tx.send(()).unwrap();
                drop(bucket);
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        held.pop();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        handle.join().unwrap();

        drop(held);
        assert_eq!(0, pool.checked_out());
    }

    #[test]
    fn pool_many_waiters() {
        let (pool, created) = counting_pool(1);
        let blocker = pool.get_bucket();

        let (tx, rx) = mpsc::channel();

        let handles = (0..6)
            .map(|i| {
                let pool = pool.clone();
                let tx = tx.clone();

                std::thread::spawn(move || {
                    let bucket = pool.get_bucket();
                    tx.send(i).unwrap();
                    std::thread::sleep(Duration::from_millis(5));
                    drop(bucket);
                })
            })
            .collect::<Vec<_>>();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(blocker);

        let mut served = (0..6)
            .map(|_| rx.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect::<Vec<_>>();
        served.sort_unstable();
        assert_eq!(vec![0, 1, 2, 3, 4, 5], served);

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(1, created.load(Ordering::Relaxed));
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let (pool, created) = counting_pool(3);
        let in_use = Arc::new(AtomicUsize::default());
        let max_in_use = Arc::new(AtomicUsize::default());

        let handles = (0..8)
            .map(|t| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                let max_in_use = max_in_use.clone();

                std::thread::spawn(move || {
                    for i in 0..500_u32 {
                        let mut bucket = pool.get_bucket();
                        assert!(bucket.is_empty());

                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_use.fetch_max(now, Ordering::SeqCst);

                        bucket.set_bucket_index(t);
                        bucket.put_value(&i.to_le_bytes(), 0, 1);

                        in_use.fetch_sub(1, Ordering::SeqCst);
                        drop(bucket);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(max_in_use.load(Ordering::SeqCst) <= 3);
        assert!(created.load(Ordering::Relaxed) <= 3);
        assert_eq!(0, pool.checked_out());
    }
}
