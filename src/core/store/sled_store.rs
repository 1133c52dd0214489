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

//! Durable content-addressed store on sled.
//!
//! Trees: `blocks` (id -> bytes), `pins` (id -> 1). Retrieval recomputes the
//! digest and compares in constant time before handing bytes back.

use async_trait::async_trait;
use subtle::ConstantTimeEq;

use super::{BlockStore, StoreError};
use crate::core::blocks::{content_hash, Block};
use crate::core::types::{now_ms, BlockAddress, CanonicalMap, StoreBackend};

/// Sled-backed store.
pub struct SledStore {
    blocks: sled::Tree,
    pins: sled::Tree,
}

impl SledStore {
    /// Open trees inside an existing db handle.
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        let blocks = db.open_tree("blocks").map_err(|_| StoreError::Unavailable)?;
        let pins = db.open_tree("pins").map_err(|_| StoreError::Unavailable)?;
        Ok(Self { blocks, pins })
    }
}

#[async_trait]
impl BlockStore for SledStore {
    async fn put(&self, block: &Block) -> Result<BlockAddress, StoreError> {
        let id = block.id();
        self.blocks
            .insert(id.as_bytes(), block.bytes())
            .map_err(|_| StoreError::Unavailable)?;
        Ok(BlockAddress {
            id,
            backend: StoreBackend::Sled,
            size: block.len() as u64,
            checksum: id,
            created_at_ms: now_ms(),
            metadata: CanonicalMap::new(),
        })
    }

    async fn get(&self, addr: &BlockAddress) -> Result<Block, StoreError> {
        let iv = self
            .blocks
            .get(addr.id.as_bytes())
            .map_err(|_| StoreError::Unavailable)?
            .ok_or(StoreError::NotFound)?;
        let bytes = iv.to_vec();
        let digest = content_hash(&bytes);
        if digest.as_bytes().ct_eq(addr.id.as_bytes()).unwrap_u8() != 1 {
            return Err(StoreError::Integrity);
        }
        Ok(Block::from_bytes(bytes))
    }

    async fn has(&self, addr: &BlockAddress) -> Result<bool, StoreError> {
        self.blocks
            .contains_key(addr.id.as_bytes())
            .map_err(|_| StoreError::Unavailable)
    }

    async fn pin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        if !self.has(addr).await? {
            return Err(StoreError::NotFound);
        }
        self.pins
            .insert(addr.id.as_bytes(), &[1u8])
            .map_err(|_| StoreError::Unavailable)?;
        Ok(())
    }

    async fn unpin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        self.pins
            .remove(addr.id.as_bytes())
            .map_err(|_| StoreError::Unavailable)?;
        Ok(())
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Sled
    }
}
