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

//! Bloom filters summarizing per-peer block inventories.
//!
//! Parameters derive from `(expected_n, fpr)`:
//! `m = ceil(-n ln p / ln^2 2)`, `k = ceil((m/n) ln 2)`.
//! Bit positions use double hashing `h1 + i*h2` where both base hashes come
//! from one SHA-256 digest of the element (`h2` forced odd so the probe
//! sequence covers the array).
//!
//! Wire format, big-endian:
//! `u64 size_bits | u32 hash_count | u64 element_count | bit_array`.
//! Two filters merge iff `size_bits` and `hash_count` match.

use bitvec::prelude::*;
use ring::digest;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::core::types::{now_ms, BlockId};

/// Hard ceiling on accepted filter size (64 MiB of bits).
const MAX_FILTER_BITS: u64 = 1 << 29;

/// Bloom errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BloomError {
    /// Merge partners differ in `m` or `k`.
    #[error("incompatible filters")]
    Incompatible,
    /// Wire bytes too short or inconsistent.
    #[error("truncated")]
    Truncated,
    /// Declared size outside accepted bounds.
    #[error("oversized")]
    Oversized,
}

/// Counting-free bloom filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    m: u64,
    k: u32,
    n: u64,
}

fn base_hashes(element: &[u8]) -> (u64, u64) {
    let d = digest::digest(&digest::SHA256, element);
    let b = d.as_ref();
    let mut h1 = [0u8; 8];
    let mut h2 = [0u8; 8];
    h1.copy_from_slice(&b[0..8]);
    h2.copy_from_slice(&b[8..16]);
    // Odd step guarantees full-period probing for power-of-two-free moduli too.
    (u64::from_be_bytes(h1), u64::from_be_bytes(h2) | 1)
}

impl BloomFilter {
    /// Filter with explicit size (bits) and hash count.
    pub fn new(m: u64, k: u32) -> Self {
        let m = m.max(8);
        Self {
            bits: bitvec![u8, Lsb0; 0; m as usize],
            m,
            k: k.max(1),
            n: 0,
        }
    }

    /// Filter sized for `expected_n` elements at false-positive rate `fpr`.
    pub fn with_rate(expected_n: usize, fpr: f64) -> Self {
        let n = expected_n.max(1) as f64;
        let p = fpr.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil() as u64;
        let k = ((m as f64 / n) * ln2).ceil() as u32;
        Self::new(m.max(8), k.max(1))
    }

    /// Size in bits.
    pub fn size_bits(&self) -> u64 {
        self.m
    }

    /// Number of hash functions.
    pub fn hash_count(&self) -> u32 {
        self.k
    }

    /// Elements inserted.
    pub fn element_count(&self) -> u64 {
        self.n
    }

    fn positions(&self, element: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = base_hashes(element);
        let m = self.m;
        (0..self.k as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    /// Insert an element. `contains` is guaranteed true afterwards.
    pub fn add(&mut self, element: &[u8]) {
        let idx: Vec<usize> = self.positions(element).collect();
        for i in idx {
            self.bits.set(i, true);
        }
        self.n += 1;
    }

    /// Membership test; false positives possible, false negatives never.
    pub fn contains(&self, element: &[u8]) -> bool {
        self.positions(element).all(|i| self.bits[i])
    }

    /// How many of `elements` test positive (a probabilistic upper bound on
    /// true membership).
    pub fn estimate_matches(&self, elements: &[BlockId]) -> usize {
        elements
            .iter()
            .filter(|id| self.contains(id.as_bytes()))
            .count()
    }

    /// Bitwise union. Requires identical `m` and `k`.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<(), BloomError> {
        if self.m != other.m || self.k != other.k {
            return Err(BloomError::Incompatible);
        }
        for i in other.bits.iter_ones() {
            self.bits.set(i, true);
        }
        self.n += other.n;
        Ok(())
    }

    /// Serialize to the stable wire format.
    pub fn marshal(&self) -> Vec<u8> {
        let body = self.bits.as_raw_slice();
        let mut out = Vec::with_capacity(20 + body.len());
        out.extend_from_slice(&self.m.to_be_bytes());
        out.extend_from_slice(&self.k.to_be_bytes());
        out.extend_from_slice(&self.n.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Parse the stable wire format.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, BloomError> {
        if bytes.len() < 20 {
            return Err(BloomError::Truncated);
        }
        let mut b8 = [0u8; 8];
        let mut b4 = [0u8; 4];
        b8.copy_from_slice(&bytes[0..8]);
        let m = u64::from_be_bytes(b8);
        b4.copy_from_slice(&bytes[8..12]);
        let k = u32::from_be_bytes(b4);
        b8.copy_from_slice(&bytes[12..20]);
        let n = u64::from_be_bytes(b8);
        if m == 0 || m > MAX_FILTER_BITS || k == 0 {
            return Err(BloomError::Oversized);
        }
        let body_len = (m as usize).div_ceil(8);
        if bytes.len() != 20 + body_len {
            return Err(BloomError::Truncated);
        }
        let mut bits = BitVec::<u8, Lsb0>::from_slice(&bytes[20..]);
        bits.truncate(m as usize);
        Ok(Self { bits, m, k, n })
    }
}

struct PeerFilter {
    filter: BloomFilter,
    updated_ms: u64,
}

/// Per-peer inventory summaries, rebuilt on every gossip.
pub struct AvailabilityTracker {
    peers: RwLock<HashMap<Vec<u8>, PeerFilter>>,
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a peer's filter from its reported block list, sized for twice
    /// the list length at 1% FPR.
    pub fn update_inventory(&self, peer: &[u8], blocks: &[BlockId]) {
        let mut filter = BloomFilter::with_rate((blocks.len() * 2).max(1), 0.01);
        for id in blocks {
            filter.add(id.as_bytes());
        }
        if let Ok(mut g) = self.peers.write() {
            g.insert(
                peer.to_vec(),
                PeerFilter {
                    filter,
                    updated_ms: now_ms(),
                },
            );
        }
    }

    /// Peers whose filter tests positive for `id`. A probabilistic upper
    /// bound on the true holder set.
    pub fn peers_with(&self, id: &BlockId) -> Vec<Vec<u8>> {
        self.peers
            .read()
            .map(|g| {
                g.iter()
                    .filter(|(_, pf)| pf.filter.contains(id.as_bytes()))
                    .map(|(peer, _)| peer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a specific peer's summary tests positive for any of `ids`.
    pub fn peer_has_any(&self, peer: &[u8], ids: &[BlockId]) -> bool {
        self.peers
            .read()
            .map(|g| {
                g.get(peer)
                    .map(|pf| pf.filter.estimate_matches(ids) > 0)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Drop summaries older than `max_age_ms`.
    pub fn prune(&self, max_age_ms: u64) -> usize {
        let cutoff = now_ms().saturating_sub(max_age_ms);
        let Ok(mut g) = self.peers.write() else {
            return 0;
        };
        let before = g.len();
        g.retain(|_, pf| pf.updated_ms >= cutoff);
        before - g.len()
    }

    /// Tracked peer count.
    pub fn len(&self) -> usize {
        self.peers.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether no peer is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop one peer's summary.
    pub fn remove(&self, peer: &[u8]) {
        if let Ok(mut g) = self.peers.write() {
            g.remove(peer);
        }
    }
}
