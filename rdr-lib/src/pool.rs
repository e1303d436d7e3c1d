use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Bucket {
    free: Vec<Vec<u8>>,
    reuses: usize,
}

/// Size-bucketed pool of packet buffers.
///
/// Buffers are filed under their exact length. A request is satisfied by the smallest free
/// buffer at least as large as requested, shrunk in place, before anything is allocated.
#[derive(Debug, Default)]
pub struct PacketPool {
    buckets: Mutex<BTreeMap<usize, Bucket>>,
    created: AtomicUsize,
}

impl PacketPool {
    #[must_use]
    pub fn new() -> Self {
        PacketPool::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, Bucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Checkout a buffer of exactly `size` bytes.
    ///
    /// Contents of a reused buffer are not cleared.
    #[must_use]
    pub fn get(&self, size: usize) -> Vec<u8> {
        {
            let mut buckets = self.lock();
            if let Some((_, bucket)) = buckets
                .range_mut(size..)
                .find(|(_, b)| !b.free.is_empty())
            {
                if let Some(mut buf) = bucket.free.pop() {
                    bucket.reuses += 1;
                    buf.truncate(size);
                    return buf;
                }
            }
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        trace!(size, "allocating packet buffer");
        vec![0u8; size]
    }

    /// Return a buffer to the pool.
    pub fn put(&self, buf: Vec<u8>) {
        let mut buckets = self.lock();
        buckets.entry(buf.len()).or_default().free.push(buf);
    }

    /// Evict buckets that were not reused more than their current population and reset
    /// reuse counts on the rest.
    pub fn preen(&self) {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| b.reuses > b.free.len());
        for bucket in buckets.values_mut() {
            bucket.reuses = 0;
        }
        debug!(evicted = before - buckets.len(), "preened packet pool");
    }

    /// Release all buffers.
    pub fn drain(&self) {
        self.lock().clear();
    }

    /// Number of buffers allocated by the pool.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of buffers currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.lock().values().map(|b| b.free.len()).sum()
    }
}
