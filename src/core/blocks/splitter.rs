// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Lazy plaintext splitter. Pulls up to `block_size` bytes per block from an
//! async reader; the final short block is zero-padded and its true length
//! kept alongside.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::block::{valid_block_size, Block, BlockError};

/// Splitter errors.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Configured block size is not a power of two >= 1 KiB.
    #[error("bad block size")]
    BadBlockSize,
    /// Underlying reader failed.
    #[error("read")]
    Read,
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// A padded block plus the true payload length before padding.
#[derive(Clone, Debug)]
pub struct SplitBlock {
    /// Padded block of exactly the configured size.
    pub block: Block,
    /// Payload length before zero padding.
    pub len: usize,
}

/// Pull-based splitter over an async reader.
pub struct Splitter<R> {
    reader: R,
    block_size: usize,
    done: bool,
}

impl<R: AsyncRead + Unpin> Splitter<R> {
    /// Wrap `reader`, producing blocks of `block_size` bytes.
    pub fn new(reader: R, block_size: usize) -> Result<Self, SplitError> {
        if !valid_block_size(block_size) {
            return Err(SplitError::BadBlockSize);
        }
        Ok(Self {
            reader,
            block_size,
            done: false,
        })
    }

    /// Next padded block, or `None` at end of stream.
    pub async fn next_block(&mut self) -> Result<Option<SplitBlock>, SplitError> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.block_size];
        let mut filled = 0usize;
        while filled < self.block_size {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(|_| SplitError::Read)?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        let (block, len) = Block::padded(buf, self.block_size)?;
        Ok(Some(SplitBlock { block, len }))
    }
}

/// Split an in-memory buffer (tests, tools).
pub fn split_bytes(data: &[u8], block_size: usize) -> Result<Vec<SplitBlock>, SplitError> {
    if !valid_block_size(block_size) {
        return Err(SplitError::BadBlockSize);
    }
    let mut out = Vec::with_capacity(data.len().div_ceil(block_size));
    for chunk in data.chunks(block_size) {
        let (block, len) = Block::padded(chunk.to_vec(), block_size)?;
        out.push(SplitBlock { block, len });
    }
    Ok(out)
}
