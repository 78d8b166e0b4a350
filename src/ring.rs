use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::utils::num::{next_pow2, u64_to_usize_saturating, usize_to_u64};

/// Consumes filled stripes of access metadata.
///
/// The batch is borrowed for the duration of the call; implementations copy
/// what they keep. Returns false when the batch was dropped.
pub(crate) trait RingConsumer: Send + Sync {
    fn push_batch(&self, keys: &[u64]) -> bool;
}

/// Lossy BP-Wrapper buffer: a pool of per-thread stripes of key hashes.
///
/// Access events are statistical, so everything here trades accuracy for the
/// absence of contention. A caller whose stripe is busy drops the event; a
/// stripe whose consumer is busy drops the whole batch.
pub(crate) struct RingBuffer {
    stripes: Vec<Mutex<RingStripe>>,
    mask: usize,
}

struct RingStripe {
    consumer: Arc<dyn RingConsumer>,
    data: Vec<u64>,
    capacity: usize,
}

impl RingStripe {
    fn push(&mut self, key: u64) {
        self.data.push(key);
        if self.data.len() >= self.capacity {
            // Hand the batch off and restart empty whether or not the
            // consumer kept it.
            self.consumer.push_batch(&self.data);
            self.data.clear();
        }
    }
}

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Lightweight thread id used to pick a stripe; assigned on first use.
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

impl RingBuffer {
    pub fn new(consumer: Arc<dyn RingConsumer>, capacity: u64) -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let num_stripes = u64_to_usize_saturating(next_pow2(usize_to_u64(parallelism * 4)));
        let capacity = u64_to_usize_saturating(capacity).max(1);
        let mut stripes = Vec::with_capacity(num_stripes);
        for _ in 0..num_stripes {
            stripes.push(Mutex::new(RingStripe {
                consumer: Arc::clone(&consumer),
                data: Vec::with_capacity(capacity),
                capacity,
            }));
        }
        Self { stripes, mask: num_stripes - 1 }
    }

    /// Records one access. Never blocks: a contended stripe drops the event.
    pub fn push(&self, key: u64) {
        let index = THREAD_SLOT.with(|slot| *slot) & self.mask;
        if let Some(mut stripe) = self.stripes[index].try_lock() {
            stripe.push(key);
        }
    }
}
