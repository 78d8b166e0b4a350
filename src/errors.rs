use thiserror::Error;

/// Errors surfaced during cache construction. Everything after construction
/// is a silent, statistical event (misses, dropped batches, rejected sets),
/// not an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("num_counters must be greater than zero")]
    NumCountersZero,

    #[error("max_cost must be greater than zero")]
    MaxCostZero,

    #[error("buffer_items must be greater than zero")]
    BufferItemsZero,
}
