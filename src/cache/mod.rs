mod config;
mod core;
mod metrics;

pub use self::config::{Config, CostFn, KeyToHashFn, OnEvictFn};
pub use self::core::Cache;
pub use self::metrics::{Metrics, MetricsSnapshot};
