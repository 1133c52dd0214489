#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Universal block pool, reuse enforcement, and popularity tracking.

mod popularity;
mod reuse;
mod universal;

pub use popularity::{
    spawn_popularity_refresh, PopularityConfig, PopularityTracker, ScoreWeights,
};
pub use reuse::{BlockMix, EnforcerError, MixOutcome, MixingPlan, ReuseEnforcer, ReusePolicy};
pub use universal::{
    BlockCategory, CorpusFile, PoolConfig, PoolError, PoolSelection, PoolStats, UniversalPool,
};
