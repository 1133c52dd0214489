#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Block primitives: fixed-size blocks, padding, XOR combination, splitting.

mod block;
mod splitter;

pub use block::{content_hash, valid_block_size, xor_combine, Block, BlockError, DEFAULT_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use splitter::{split_bytes, SplitBlock, SplitError, Splitter};
