// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Cache-fronted store: the tiered cache sits in front of the object store
//! for both reads and writes.

use async_trait::async_trait;
use std::sync::Arc;

use super::{BlockStore, StoreError};
use crate::core::blocks::Block;
use crate::core::cache::AltruisticCache;
use crate::core::types::{BlockAddress, StoreBackend};
use crate::monitoring::metrics::Metrics;

/// Read-through / write-through store front.
pub struct CachedStore {
    inner: Arc<dyn BlockStore>,
    cache: Arc<AltruisticCache>,
    metrics: Arc<Metrics>,
}

impl CachedStore {
    /// Front `inner` with `cache`.
    pub fn new(
        inner: Arc<dyn BlockStore>,
        cache: Arc<AltruisticCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner,
            cache,
            metrics,
        }
    }

    /// The cache behind this front.
    pub fn cache(&self) -> &Arc<AltruisticCache> {
        &self.cache
    }
}

#[async_trait]
impl BlockStore for CachedStore {
    async fn put(&self, block: &Block) -> Result<BlockAddress, StoreError> {
        let addr = self.inner.put(block).await?;
        self.cache.put_personal(block.id(), block.bytes().to_vec());
        Ok(addr)
    }

    async fn get(&self, addr: &BlockAddress) -> Result<Block, StoreError> {
        if let Some(bytes) = self.cache.get(&addr.id) {
            self.metrics.cache_hits_total.inc();
            return Ok(Block::from_bytes(bytes));
        }
        self.metrics.cache_misses_total.inc();
        let block = self.inner.get(addr).await?;
        self.cache.put_personal(block.id(), block.bytes().to_vec());
        Ok(block)
    }

    async fn has(&self, addr: &BlockAddress) -> Result<bool, StoreError> {
        if self.cache.contains(&addr.id) {
            return Ok(true);
        }
        self.inner.has(addr).await
    }

    async fn pin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        self.inner.pin(addr).await
    }

    async fn unpin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        self.inner.unpin(addr).await
    }

    fn backend(&self) -> StoreBackend {
        self.inner.backend()
    }
}
