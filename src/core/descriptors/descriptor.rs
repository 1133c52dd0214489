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

//! Per-file manifest and its stable wire format.
//!
//! Layout (all integers big-endian, field order fixed):
//!
//! ```text
//! u8  version
//! u64 file_size
//! u32 block_size
//! u32 block_count
//! block_count x entry:
//!     32B anonymized_id
//!     u8  randomizer_count   (>= 1)
//!     32B x randomizer_count
//!     u8  public_domain_count
//!     32B x public_domain_count
//!     u32 len                (true payload length, pre-padding)
//! reuse_proof:
//!     u32 reused  u32 fresh  u32 public_domain
//!     u32 reuse_ratio_milli  u32 public_domain_ratio_milli
//!     u64 certified_at_ms
//! mixing:
//!     u8  min_randomizers
//!     u32 public_domain_entries
//! u64 created_at_ms
//! ```

use thiserror::Error;

use crate::core::blocks::valid_block_size;
use crate::core::types::BlockId;

/// Current wire version.
pub const DESCRIPTOR_VERSION: u8 = 1;

// Parser ceiling; a descriptor at the 100 MiB file bound with 1 KiB blocks
// stays far below this.
const MAX_BLOCK_COUNT: u32 = 1 << 22;

/// Descriptor errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Wire bytes end before the declared fields.
    #[error("truncated")]
    Truncated,
    /// Unknown wire version.
    #[error("unsupported version")]
    Version,
    /// Bytes remain after the last field.
    #[error("trailing bytes")]
    Trailing,
    /// A structural invariant does not hold.
    #[error("malformed: {0}")]
    Malformed(&'static str),
}

/// One reconstruction entry: XOR the anonymized block with every listed
/// randomizer and public-domain block to recover plaintext block `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorEntry {
    /// Stored anonymized block.
    pub anonymized_id: BlockId,
    /// Randomizers mixed in; never empty.
    pub randomizer_ids: Vec<BlockId>,
    /// Public-domain blocks mixed in; may be empty.
    pub public_domain_ids: Vec<BlockId>,
    /// True payload length before zero padding.
    pub len: u32,
}

/// Compact record certifying that an upload obeyed the reuse/mixing policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ReuseProof {
    /// Randomizer selections that satisfied the reuse threshold.
    pub reused: u32,
    /// Randomizer selections below the reuse threshold.
    pub fresh: u32,
    /// Public-domain blocks mixed in.
    pub public_domain: u32,
    /// reused / (reused + fresh), in thousandths.
    pub reuse_ratio_milli: u32,
    /// Entries carrying public-domain content / entries, in thousandths.
    pub public_domain_ratio_milli: u32,
    /// Certification time, ms since UNIX epoch.
    pub certified_at_ms: u64,
}

/// Summary of the mixing plan the enforcer executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MixingSummary {
    /// Smallest per-entry randomizer count.
    pub min_randomizers: u8,
    /// Entries that carry at least one public-domain block.
    pub public_domain_entries: u32,
}

/// Per-file manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Original file size in bytes.
    pub file_size: u64,
    /// Block size used by the split.
    pub block_size: u32,
    /// Reconstruction entries, in plaintext order.
    pub entries: Vec<DescriptorEntry>,
    /// Reuse certification.
    pub reuse_proof: ReuseProof,
    /// Mixing plan summary.
    pub mixing: MixingSummary,
    /// Assembly time, ms since UNIX epoch.
    pub created_at_ms: u64,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DescriptorError> {
        let end = self.pos.checked_add(n).ok_or(DescriptorError::Truncated)?;
        if end > self.buf.len() {
            return Err(DescriptorError::Truncated);
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, DescriptorError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, DescriptorError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DescriptorError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }

    fn id(&mut self) -> Result<BlockId, DescriptorError> {
        let b = self.take(32)?;
        let mut a = [0u8; 32];
        a.copy_from_slice(b);
        Ok(BlockId::from_bytes(a))
    }

    fn done(&self) -> bool {
        self.pos == self.buf.len()
    }
}

impl Descriptor {
    /// Serialize to the stable wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.entries.len() * 128);
        out.push(DESCRIPTOR_VERSION);
        out.extend_from_slice(&self.file_size.to_be_bytes());
        out.extend_from_slice(&self.block_size.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for e in &self.entries {
            out.extend_from_slice(e.anonymized_id.as_bytes());
            out.push(e.randomizer_ids.len() as u8);
            for r in &e.randomizer_ids {
                out.extend_from_slice(r.as_bytes());
            }
            out.push(e.public_domain_ids.len() as u8);
            for p in &e.public_domain_ids {
                out.extend_from_slice(p.as_bytes());
            }
            out.extend_from_slice(&e.len.to_be_bytes());
        }
        let rp = &self.reuse_proof;
        out.extend_from_slice(&rp.reused.to_be_bytes());
        out.extend_from_slice(&rp.fresh.to_be_bytes());
        out.extend_from_slice(&rp.public_domain.to_be_bytes());
        out.extend_from_slice(&rp.reuse_ratio_milli.to_be_bytes());
        out.extend_from_slice(&rp.public_domain_ratio_milli.to_be_bytes());
        out.extend_from_slice(&rp.certified_at_ms.to_be_bytes());
        out.push(self.mixing.min_randomizers);
        out.extend_from_slice(&self.mixing.public_domain_entries.to_be_bytes());
        out.extend_from_slice(&self.created_at_ms.to_be_bytes());
        out
    }

    /// Parse and validate the stable wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let mut r = Reader::new(bytes);
        if r.u8()? != DESCRIPTOR_VERSION {
            return Err(DescriptorError::Version);
        }
        let file_size = r.u64()?;
        let block_size = r.u32()?;
        let block_count = r.u32()?;
        if block_count > MAX_BLOCK_COUNT {
            return Err(DescriptorError::Malformed("block count"));
        }
        let mut entries = Vec::with_capacity(block_count.min(1 << 16) as usize);
        for _ in 0..block_count {
            let anonymized_id = r.id()?;
            let nr = r.u8()? as usize;
            let mut randomizer_ids = Vec::with_capacity(nr);
            for _ in 0..nr {
                randomizer_ids.push(r.id()?);
            }
            let np = r.u8()? as usize;
            let mut public_domain_ids = Vec::with_capacity(np);
            for _ in 0..np {
                public_domain_ids.push(r.id()?);
            }
            let len = r.u32()?;
            entries.push(DescriptorEntry {
                anonymized_id,
                randomizer_ids,
                public_domain_ids,
                len,
            });
        }
        let reuse_proof = ReuseProof {
            reused: r.u32()?,
            fresh: r.u32()?,
            public_domain: r.u32()?,
            reuse_ratio_milli: r.u32()?,
            public_domain_ratio_milli: r.u32()?,
            certified_at_ms: r.u64()?,
        };
        let mixing = MixingSummary {
            min_randomizers: r.u8()?,
            public_domain_entries: r.u32()?,
        };
        let created_at_ms = r.u64()?;
        if !r.done() {
            return Err(DescriptorError::Trailing);
        }
        let d = Self {
            file_size,
            block_size,
            entries,
            reuse_proof,
            mixing,
            created_at_ms,
        };
        d.validate()?;
        Ok(d)
    }

    /// Structural invariants: legal block size, non-empty randomizer lists,
    /// per-entry lengths bounded by the block size and summing to the file
    /// size.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if !valid_block_size(self.block_size as usize) {
            return Err(DescriptorError::Malformed("block size"));
        }
        let mut sum: u64 = 0;
        for e in &self.entries {
            if e.randomizer_ids.is_empty() {
                return Err(DescriptorError::Malformed("empty randomizer list"));
            }
            if e.len == 0 || e.len > self.block_size {
                return Err(DescriptorError::Malformed("entry length"));
            }
            sum = sum.saturating_add(e.len as u64);
        }
        if sum != self.file_size {
            return Err(DescriptorError::Malformed("length sum"));
        }
        Ok(())
    }

    /// Number of reconstruction entries.
    pub fn block_count(&self) -> u32 {
        self.entries.len() as u32
    }
}
