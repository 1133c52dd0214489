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

//! Universal block pool: the curated set of reusable randomizer blocks.
//!
//! Selection is biased toward entries below the cohort's median reuse count
//! (to spread load) and toward popular blocks (for anonymity-set strength).
//! Reuse counters are monotonic and atomically incremented; deletion is gated
//! on a zero count plus an age threshold.
//!
//! ## Curation corpus
//! Public-domain provenance is an external input: a TOML file listing
//! previously-stored object addresses, verified present at initialization.
//!
//! ```text
//! version = 1
//! category = "public_domain"
//! addresses = ["<base58 id>", "..."]
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use super::popularity::PopularityTracker;
use crate::core::blocks::Block;
use crate::core::store::{BlockStore, StoreError};
use crate::core::types::{now_ms, BlockAddress, BlockId, CanonicalMap};

/// Content category of a pool entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCategory {
    /// Curated public-domain content.
    PublicDomain,
    /// Media payloads.
    Media,
    /// Documents.
    Document,
    /// Archives.
    Archive,
    /// Source code.
    Code,
    /// Unclassified.
    Unknown,
}

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Not enough distinct blocks of the requested size.
    #[error("insufficient randomizers")]
    Insufficient,
    #[error("corpus read")]
    CorpusRead,
    #[error("corpus parse")]
    CorpusParse,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Entry cap.
    pub max_size: usize,
    /// Reuse count at which an entry counts as reused for policy.
    pub min_reuse_count: u64,
    /// Warn threshold for the public-domain fraction.
    pub min_public_domain_fraction: f64,
    /// Blocks minted at first initialization.
    pub seed_blocks: usize,
    /// Block size for minted randomizers.
    pub block_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4096,
            min_reuse_count: 2,
            min_public_domain_fraction: 0.3,
            seed_blocks: 64,
            block_size: crate::core::blocks::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Curation corpus file.
#[derive(Clone, Debug, Deserialize)]
pub struct CorpusFile {
    /// Format version; 1 is the only supported value.
    pub version: u32,
    /// Category applied to every listed address.
    pub category: String,
    /// Base58 content ids previously stored in the object store.
    pub addresses: Vec<String>,
}

impl CorpusFile {
    /// Parse the TOML corpus format.
    pub fn parse(text: &str) -> Result<Self, PoolError> {
        let f: CorpusFile = toml::from_str(text).map_err(|_| PoolError::CorpusParse)?;
        if f.version != 1 {
            return Err(PoolError::CorpusParse);
        }
        Ok(f)
    }
}

struct PoolEntry {
    address: BlockAddress,
    category: BlockCategory,
    reuse_count: AtomicU64,
    first_seen_ms: u64,
    last_used_ms: AtomicU64,
}

/// One selected randomizer, with whether it satisfies the reuse threshold.
pub struct PoolSelection {
    /// The randomizer block itself.
    pub block: Block,
    /// Its store address.
    pub address: BlockAddress,
    /// Category of the pool entry.
    pub category: BlockCategory,
    /// Whether `reuse_count >= min_reuse_count` held at selection time.
    pub reused: bool,
}

/// Aggregate pool counters.
#[derive(Clone, Debug)]
pub struct PoolStats {
    /// Entries resident.
    pub size: usize,
    /// Mean reuse count.
    pub avg_reuse: f64,
    /// Fraction of entries that are public domain.
    pub public_domain_fraction: f64,
    /// Entry count per category.
    pub category_breakdown: CanonicalMap<String, usize>,
}

/// The universal pool.
pub struct UniversalPool {
    cfg: PoolConfig,
    store: Arc<dyn BlockStore>,
    popularity: Arc<PopularityTracker>,
    entries: RwLock<HashMap<BlockId, PoolEntry>>,
}

impl UniversalPool {
    /// Empty pool over `store`.
    pub fn new(
        cfg: PoolConfig,
        store: Arc<dyn BlockStore>,
        popularity: Arc<PopularityTracker>,
    ) -> Self {
        Self {
            cfg,
            store,
            popularity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the pool: mint fresh randomizers up to `seed_blocks` and ingest
    /// the curation corpus if one is configured. Short public-domain supply
    /// is a warning, not an error.
    pub async fn initialize(&self, corpus_path: Option<&str>) -> Result<(), PoolError> {
        for _ in 0..self.cfg.seed_blocks {
            let block = {
                let mut rng = rand::thread_rng();
                Block::random(self.cfg.block_size, &mut rng)
            };
            let addr = self.store.put(&block).await?;
            self.insert_entry(addr, BlockCategory::Unknown);
        }
        if let Some(path) = corpus_path {
            let text = fs::read_to_string(path).map_err(|_| PoolError::CorpusRead)?;
            let corpus = CorpusFile::parse(&text)?;
            self.ingest_corpus(&corpus).await?;
        }
        let stats = self.stats();
        if stats.public_domain_fraction < self.cfg.min_public_domain_fraction {
            warn!(
                fraction = stats.public_domain_fraction,
                minimum = self.cfg.min_public_domain_fraction,
                "public-domain fraction below target; uploads may mint extra mixes"
            );
        }
        info!(size = stats.size, "pool initialized");
        Ok(())
    }

    /// Verify each corpus address is present in the store and add it.
    pub async fn ingest_corpus(&self, corpus: &CorpusFile) -> Result<usize, PoolError> {
        let category = match corpus.category.as_str() {
            "public_domain" => BlockCategory::PublicDomain,
            "media" => BlockCategory::Media,
            "document" => BlockCategory::Document,
            "archive" => BlockCategory::Archive,
            "code" => BlockCategory::Code,
            _ => BlockCategory::Unknown,
        };
        let mut added = 0usize;
        for s in &corpus.addresses {
            let Some(id) = BlockId::from_base58(s) else {
                warn!(address = %s, "bad corpus address; skipping");
                continue;
            };
            let addr = BlockAddress::for_id(self.store.backend(), id);
            match self.store.get(&addr).await {
                Ok(block) => {
                    let full = BlockAddress {
                        size: block.len() as u64,
                        ..addr
                    };
                    self.insert_entry(full, category);
                    self.popularity.set_category(&id, category);
                    added += 1;
                }
                Err(StoreError::NotFound) => {
                    warn!(address = %s, "corpus address absent; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(added)
    }

    fn insert_entry(&self, address: BlockAddress, category: BlockCategory) {
        let Ok(mut g) = self.entries.write() else {
            return;
        };
        if g.len() >= self.cfg.max_size {
            return;
        }
        let now = now_ms();
        g.entry(address.id).or_insert_with(|| PoolEntry {
            address,
            category,
            reuse_count: AtomicU64::new(0),
            first_seen_ms: now,
            last_used_ms: AtomicU64::new(now),
        });
    }

    /// Select `count` distinct randomizers of byte-size `size`.
    ///
    /// Entries below the cohort median reuse count are preferred, weighted by
    /// popularity. When the size cohort is short, fresh random blocks are
    /// minted (stored and pooled) while the entry cap allows; past the cap
    /// the selection fails rather than degrading the mix.
    pub async fn select_randomizers(
        &self,
        size: usize,
        count: usize,
    ) -> Result<Vec<PoolSelection>, PoolError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let chosen = self.pick_entries(size, count, None);

        let mut selections = Vec::with_capacity(count);
        for (addr, category, reused) in &chosen {
            let block = self.store.get(addr).await?;
            selections.push(PoolSelection {
                block,
                address: addr.clone(),
                category: *category,
                reused: *reused,
            });
        }

        // Top up with freshly minted randomizers if the cohort was short.
        while selections.len() < count {
            {
                let g = self.entries.read().map_err(|_| PoolError::Insufficient)?;
                if g.len() >= self.cfg.max_size {
                    return Err(PoolError::Insufficient);
                }
            }
            let block = {
                let mut rng = rand::thread_rng();
                Block::random(size, &mut rng)
            };
            let addr = self.store.put(&block).await?;
            self.insert_entry(addr.clone(), BlockCategory::Unknown);
            selections.push(PoolSelection {
                block,
                address: addr,
                category: BlockCategory::Unknown,
                reused: false,
            });
        }
        Ok(selections)
    }

    /// Select up to `count` public-domain blocks of byte-size `size`. May
    /// return fewer; the enforcer accounts for the shortfall.
    pub async fn select_public_domain(
        &self,
        size: usize,
        count: usize,
        exclude: &[BlockId],
    ) -> Result<Vec<PoolSelection>, PoolError> {
        let mut chosen = self.pick_entries(size, count, Some(BlockCategory::PublicDomain));
        chosen.retain(|(addr, _, _)| !exclude.contains(&addr.id));
        let mut out = Vec::with_capacity(chosen.len());
        for (addr, category, reused) in chosen {
            let block = self.store.get(&addr).await?;
            out.push(PoolSelection {
                block,
                address: addr,
                category,
                reused,
            });
        }
        Ok(out)
    }

    // Weighted pick without replacement over the size cohort.
    fn pick_entries(
        &self,
        size: usize,
        count: usize,
        category: Option<BlockCategory>,
    ) -> Vec<(BlockAddress, BlockCategory, bool)> {
        let Ok(g) = self.entries.read() else {
            return Vec::new();
        };
        let cohort: Vec<(&BlockId, &PoolEntry, u64)> = g
            .iter()
            .filter(|(_, e)| e.address.size == size as u64)
            .filter(|(_, e)| category.map_or(true, |c| e.category == c))
            .map(|(id, e)| (id, e, e.reuse_count.load(Ordering::Relaxed)))
            .collect();
        if cohort.is_empty() {
            return Vec::new();
        }
        let mut counts: Vec<u64> = cohort.iter().map(|(_, _, c)| *c).collect();
        counts.sort_unstable();
        let median = counts[counts.len() / 2];

        let mut rng = rand::thread_rng();
        let mut weighted: Vec<(f64, usize)> = cohort
            .iter()
            .enumerate()
            .map(|(i, (id, _, c))| {
                let load = if *c <= median { 2.0 } else { 1.0 };
                let pop = 1.0 + self.popularity.score(id);
                // Random jitter makes the weighted order a sample rather
                // than a fixed ranking.
                let w = load * pop * rng.gen_range(0.5..1.5);
                (w, i)
            })
            .collect();
        weighted.sort_by(|a, b| b.0.total_cmp(&a.0));

        weighted
            .into_iter()
            .take(count)
            .map(|(_, i)| {
                let (_, e, c) = cohort[i];
                (
                    e.address.clone(),
                    e.category,
                    c >= self.cfg.min_reuse_count,
                )
            })
            .collect()
    }

    /// Increment reuse counters and stamp last-use.
    pub fn record_use(&self, ids: &[BlockId]) {
        let Ok(g) = self.entries.read() else {
            return;
        };
        let now = now_ms();
        for id in ids {
            if let Some(e) = g.get(id) {
                e.reuse_count.fetch_add(1, Ordering::Relaxed);
                e.last_used_ms.store(now, Ordering::Relaxed);
                self.popularity.mark_randomizer(id);
            }
        }
    }

    /// Current reuse count of an entry.
    pub fn reuse_count(&self, id: &BlockId) -> Option<u64> {
        self.entries
            .read()
            .ok()?
            .get(id)
            .map(|e| e.reuse_count.load(Ordering::Relaxed))
    }

    /// Remove entries with zero reuse older than `min_age_ms`. Referenced
    /// randomizers (count > 0) are never dropped.
    pub fn prune_unused(&self, min_age_ms: u64) -> usize {
        let Ok(mut g) = self.entries.write() else {
            return 0;
        };
        let cutoff = now_ms().saturating_sub(min_age_ms);
        let before = g.len();
        g.retain(|_, e| {
            e.reuse_count.load(Ordering::Relaxed) > 0 || e.first_seen_ms >= cutoff
        });
        before - g.len()
    }

    /// Aggregate counters.
    pub fn stats(&self) -> PoolStats {
        let Ok(g) = self.entries.read() else {
            return PoolStats {
                size: 0,
                avg_reuse: 0.0,
                public_domain_fraction: 0.0,
                category_breakdown: CanonicalMap::new(),
            };
        };
        let size = g.len();
        let total_reuse: u64 = g
            .values()
            .map(|e| e.reuse_count.load(Ordering::Relaxed))
            .sum();
        let pd = g
            .values()
            .filter(|e| e.category == BlockCategory::PublicDomain)
            .count();
        let mut breakdown = CanonicalMap::new();
        for e in g.values() {
            *breakdown
                .entry(format!("{:?}", e.category).to_lowercase())
                .or_insert(0) += 1;
        }
        PoolStats {
            size,
            avg_reuse: if size == 0 {
                0.0
            } else {
                total_reuse as f64 / size as f64
            },
            public_domain_fraction: if size == 0 { 0.0 } else { pd as f64 / size as f64 },
            category_breakdown: breakdown,
        }
    }
}
