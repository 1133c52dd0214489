#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Adaptive tiered block cache with altruistic capacity arbitration.

mod adaptive;
mod altruistic;

pub use adaptive::{
    spawn_cache_maintenance, AdaptiveCache, AdaptiveCacheConfig, CacheClass, CacheStats, CacheTier,
    PutReport,
};
pub use altruistic::{AltruisticCache, AltruisticConfig};
