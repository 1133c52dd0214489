// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! In-process store for tests and tools.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{BlockStore, StoreError};
use crate::core::blocks::{content_hash, Block};
use crate::core::types::{now_ms, BlockAddress, BlockId, CanonicalMap, StoreBackend};

#[derive(Default)]
struct MemoryInner {
    blocks: HashMap<BlockId, Vec<u8>>,
    pins: HashSet<BlockId>,
}

/// HashMap-backed store. Integrity checks run exactly as in the durable
/// backend so tests exercise the same failure paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.blocks.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored ids (tests use this for no-plaintext sweeps).
    pub fn ids(&self) -> Vec<BlockId> {
        self.inner
            .read()
            .map(|g| g.blocks.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn put(&self, block: &Block) -> Result<BlockAddress, StoreError> {
        let id = block.id();
        let mut g = self.inner.write().map_err(|_| StoreError::Unavailable)?;
        g.blocks.entry(id).or_insert_with(|| block.bytes().to_vec());
        Ok(BlockAddress {
            id,
            backend: StoreBackend::Memory,
            size: block.len() as u64,
            checksum: id,
            created_at_ms: now_ms(),
            metadata: CanonicalMap::new(),
        })
    }

    async fn get(&self, addr: &BlockAddress) -> Result<Block, StoreError> {
        let bytes = {
            let g = self.inner.read().map_err(|_| StoreError::Unavailable)?;
            g.blocks.get(&addr.id).cloned().ok_or(StoreError::NotFound)?
        };
        if content_hash(&bytes) != addr.id {
            return Err(StoreError::Integrity);
        }
        Ok(Block::from_bytes(bytes))
    }

    async fn has(&self, addr: &BlockAddress) -> Result<bool, StoreError> {
        let g = self.inner.read().map_err(|_| StoreError::Unavailable)?;
        Ok(g.blocks.contains_key(&addr.id))
    }

    async fn pin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        let mut g = self.inner.write().map_err(|_| StoreError::Unavailable)?;
        if !g.blocks.contains_key(&addr.id) {
            return Err(StoreError::NotFound);
        }
        g.pins.insert(addr.id);
        Ok(())
    }

    async fn unpin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        let mut g = self.inner.write().map_err(|_| StoreError::Unavailable)?;
        g.pins.remove(&addr.id);
        Ok(())
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }
}
