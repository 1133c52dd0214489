// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Content-addressed object-store contract and backends.
//!
//! The system addresses blocks by opaque content ids; backends are a closed
//! set (`memory`, `sled`). Integrity is re-checked on every retrieval.

mod cached;
mod memory;
mod resilient;
mod sled_store;

pub use cached::CachedStore;
pub use memory::MemoryStore;
pub use resilient::{ResilientStore, RetryPolicy};
pub use sled_store::SledStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::blocks::Block;
use crate::core::error::NoiseError;
use crate::core::types::{BlockAddress, StoreBackend};

/// Store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or failing transiently; retryable.
    #[error("unavailable")]
    Unavailable,
    /// Address absent.
    #[error("not found")]
    NotFound,
    /// Retrieved bytes do not hash to the requested id. Not retryable on the
    /// same backend.
    #[error("integrity")]
    Integrity,
    /// Per-call deadline exceeded.
    #[error("timeout")]
    Timeout,
}

impl From<StoreError> for NoiseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable | StoreError::Timeout => NoiseError::StoreUnavailable,
            StoreError::NotFound => NoiseError::NotFound,
            StoreError::Integrity => NoiseError::IntegrityFailure,
        }
    }
}

/// Content-addressed block store. Put returns the address derived from the
/// block's content hash; get verifies the hash before returning.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block; idempotent for identical content.
    async fn put(&self, block: &Block) -> Result<BlockAddress, StoreError>;

    /// Retrieve and integrity-check a block.
    async fn get(&self, addr: &BlockAddress) -> Result<Block, StoreError>;

    /// Whether the address is present.
    async fn has(&self, addr: &BlockAddress) -> Result<bool, StoreError>;

    /// Protect a block from garbage collection.
    async fn pin(&self, addr: &BlockAddress) -> Result<(), StoreError>;

    /// Remove garbage-collection protection.
    async fn unpin(&self, addr: &BlockAddress) -> Result<(), StoreError>;

    /// Batch put. Default implementation stores sequentially.
    async fn put_many(&self, blocks: &[Block]) -> Result<Vec<BlockAddress>, StoreError> {
        let mut out = Vec::with_capacity(blocks.len());
        for b in blocks {
            out.push(self.put(b).await?);
        }
        Ok(out)
    }

    /// Batch get. Default implementation fetches sequentially.
    async fn get_many(&self, addrs: &[BlockAddress]) -> Result<Vec<Block>, StoreError> {
        let mut out = Vec::with_capacity(addrs.len());
        for a in addrs {
            out.push(self.get(a).await?);
        }
        Ok(out)
    }

    /// Which backend this store is.
    fn backend(&self) -> StoreBackend;
}
