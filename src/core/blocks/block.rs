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
#![deny(missing_docs)]

//! Fixed-size block with eager content hashing and XOR combination.
//!
//! XOR is associative and commutative, so
//! `xor_combine(anon, r1, .., rk) = plaintext` iff
//! `anon = plaintext ^ r1 ^ .. ^ rk`. Randomizers must be distinct within a
//! single block's list; they need not be distinct across files.

use rand::RngCore;
use ring::digest;
use thiserror::Error;

use crate::core::types::BlockId;

/// Smallest legal block size (1 KiB).
pub const MIN_BLOCK_SIZE: usize = 1024;
/// Default block size (128 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Whether `n` is a legal configured block size.
pub fn valid_block_size(n: usize) -> bool {
    n >= MIN_BLOCK_SIZE && n.is_power_of_two()
}

/// Block errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// Inputs to an XOR combination differ in length.
    #[error("size mismatch")]
    SizeMismatch,
    /// XOR combination needs at least two inputs.
    #[error("too few inputs")]
    TooFewInputs,
    /// Payload longer than the target padded size.
    #[error("oversized payload")]
    Oversized,
}

/// Immutable byte block. The content hash is computed once at construction;
/// a `Block` is never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    bytes: Vec<u8>,
    id: BlockId,
}

/// SHA-256 content hash of raw bytes.
pub fn content_hash(bytes: &[u8]) -> BlockId {
    let d = digest::digest(&digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    BlockId::from_bytes(out)
}

impl Block {
    /// Wrap raw bytes as a block.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let id = content_hash(&bytes);
        Self { bytes, id }
    }

    /// Zero-pad `bytes` up to `size`. Returns the block and the true
    /// (pre-padding) length, recorded later in the descriptor entry.
    pub fn padded(mut bytes: Vec<u8>, size: usize) -> Result<(Self, usize), BlockError> {
        if bytes.len() > size {
            return Err(BlockError::Oversized);
        }
        let len = bytes.len();
        bytes.resize(size, 0);
        Ok((Self::from_bytes(bytes), len))
    }

    /// Fresh random block of `size` bytes (randomizer minting).
    pub fn random<R: RngCore>(size: usize, rng: &mut R) -> Self {
        let mut bytes = vec![0u8; size];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Content hash.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bitwise XOR of two or more equal-sized blocks.
pub fn xor_combine(blocks: &[&Block]) -> Result<Block, BlockError> {
    if blocks.len() < 2 {
        return Err(BlockError::TooFewInputs);
    }
    let size = blocks[0].len();
    if blocks.iter().any(|b| b.len() != size) {
        return Err(BlockError::SizeMismatch);
    }
    let mut out = blocks[0].bytes.clone();
    for b in &blocks[1..] {
        for (o, x) in out.iter_mut().zip(b.bytes.iter()) {
            *o ^= x;
        }
    }
    Ok(Block::from_bytes(out))
}
