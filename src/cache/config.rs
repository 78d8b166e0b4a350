use std::sync::Arc;

use crate::errors::CacheError;

/// Invoked for every eviction and expiration with
/// `(key, conflict, value, cost)`. Never invoked for explicit deletes.
/// Must be non-blocking; a panic is caught and logged, and re-entering the
/// cache from inside the callback is not supported.
pub type OnEvictFn<V> = dyn Fn(u64, u64, V, i64) + Send + Sync;

/// Maps a raw key to a `(primary, conflict)` hash pair. Must be
/// deterministic; both halves participate in identity.
pub type KeyToHashFn<K> = dyn Fn(&K) -> (u64, u64) + Send + Sync;

/// Computes the cost of a value when the caller passes cost zero.
pub type CostFn<V> = dyn Fn(&V) -> i64 + Send + Sync;

/// Construction parameters for [`Cache`](crate::Cache).
pub struct Config<K, V> {
    /// Number of frequency counters to size the sketch and doorkeeper for.
    /// Should be around the expected item count at capacity, times ten.
    pub num_counters: u64,
    /// Total cost budget of the cache.
    pub max_cost: i64,
    /// Per-stripe capacity of the lossy access ring.
    pub buffer_items: u64,
    /// Whether to keep atomic counters on every operation.
    pub metrics: bool,
    pub on_evict: Option<Arc<OnEvictFn<V>>>,
    pub key_to_hash: Option<Arc<KeyToHashFn<K>>>,
    pub cost: Option<Arc<CostFn<V>>>,
}

impl<K, V> Default for Config<K, V> {
    fn default() -> Self {
        Self {
            num_counters: 100_000,
            max_cost: 100_000,
            buffer_items: 64,
            metrics: false,
            on_evict: None,
            key_to_hash: None,
            cost: None,
        }
    }
}

impl<K, V> Config<K, V> {
    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.num_counters == 0 {
            return Err(CacheError::NumCountersZero);
        }
        if self.max_cost <= 0 {
            return Err(CacheError::MaxCostZero);
        }
        if self.buffer_items == 0 {
            return Err(CacheError::BufferItemsZero);
        }
        Ok(())
    }
}
