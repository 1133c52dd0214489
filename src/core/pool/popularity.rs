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

//! Rolling block-popularity scoring.
//!
//! The score in [0,1] is a weighted sum of normalized access count, recency
//! (`1/(1 + hours_since * decay)`), peer-report consensus, a per-category
//! weight, and a bonus for blocks already used as randomizers. A background
//! refresh recomputes scores and the trend (rolling access-count derivative).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

use super::universal::BlockCategory;
use crate::core::types::{now_ms, BlockId};

/// Score component weights; must sum to 1.
#[derive(Clone, Copy, Debug)]
pub struct ScoreWeights {
    /// Normalized access count.
    pub access: f64,
    /// Recency decay term.
    pub recency: f64,
    /// Peer-report consensus.
    pub consensus: f64,
    /// Category weight.
    pub category: f64,
    /// Randomizer-usage bonus.
    pub randomizer: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            access: 0.3,
            recency: 0.25,
            consensus: 0.2,
            category: 0.15,
            randomizer: 0.1,
        }
    }
}

/// Tracker configuration.
#[derive(Clone, Debug)]
pub struct PopularityConfig {
    /// Background recompute period.
    pub refresh_interval: Duration,
    /// Recency decay per hour.
    pub decay_per_hour: f64,
    /// Component weights.
    pub weights: ScoreWeights,
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            decay_per_hour: 0.5,
            weights: ScoreWeights::default(),
        }
    }
}

fn category_weight(c: BlockCategory) -> f64 {
    match c {
        BlockCategory::PublicDomain => 1.0,
        BlockCategory::Media => 0.8,
        BlockCategory::Document => 0.6,
        BlockCategory::Archive => 0.5,
        BlockCategory::Code => 0.6,
        BlockCategory::Unknown => 0.4,
    }
}

struct BlockStats {
    access_count: u64,
    // Access count sampled at the two most recent refreshes, for the trend.
    prev_sample: u64,
    last_access_ms: u64,
    peer_reports: u32,
    category: BlockCategory,
    used_as_randomizer: bool,
    score: f64,
    trend: f64,
}

impl BlockStats {
    fn new(category: BlockCategory, now: u64) -> Self {
        Self {
            access_count: 0,
            prev_sample: 0,
            last_access_ms: now,
            peer_reports: 0,
            category,
            used_as_randomizer: false,
            score: 0.0,
            trend: 0.0,
        }
    }
}

/// Popularity tracker.
pub struct PopularityTracker {
    cfg: PopularityConfig,
    state: RwLock<HashMap<BlockId, BlockStats>>,
}

impl PopularityTracker {
    /// Empty tracker.
    pub fn new(cfg: PopularityConfig) -> Self {
        Self {
            cfg,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PopularityConfig {
        &self.cfg
    }

    /// Record a local access.
    pub fn record_access(&self, id: &BlockId) {
        let now = now_ms();
        if let Ok(mut g) = self.state.write() {
            let s = g
                .entry(*id)
                .or_insert_with(|| BlockStats::new(BlockCategory::Unknown, now));
            s.access_count += 1;
            s.last_access_ms = now;
        }
    }

    /// Record how many peers reported holding the block.
    pub fn record_peer_report(&self, id: &BlockId, peers: u32) {
        if let Ok(mut g) = self.state.write() {
            let s = g
                .entry(*id)
                .or_insert_with(|| BlockStats::new(BlockCategory::Unknown, now_ms()));
            s.peer_reports = s.peer_reports.max(peers);
        }
    }

    /// Tag a block's content category.
    pub fn set_category(&self, id: &BlockId, category: BlockCategory) {
        if let Ok(mut g) = self.state.write() {
            let s = g
                .entry(*id)
                .or_insert_with(|| BlockStats::new(category, now_ms()));
            s.category = category;
        }
    }

    /// Mark a block as having served as a randomizer.
    pub fn mark_randomizer(&self, id: &BlockId) {
        if let Ok(mut g) = self.state.write() {
            let s = g
                .entry(*id)
                .or_insert_with(|| BlockStats::new(BlockCategory::Unknown, now_ms()));
            s.used_as_randomizer = true;
        }
    }

    /// Current score, 0 for unknown blocks.
    pub fn score(&self, id: &BlockId) -> f64 {
        self.state
            .read()
            .ok()
            .and_then(|g| g.get(id).map(|s| s.score))
            .unwrap_or(0.0)
    }

    /// Recompute every score and trend. Called by the background loop; tests
    /// call it directly with a pinned clock.
    pub fn refresh(&self, now: u64) {
        let Ok(mut g) = self.state.write() else {
            return;
        };
        let max_access = g.values().map(|s| s.access_count).max().unwrap_or(0).max(1);
        let max_reports = g.values().map(|s| s.peer_reports).max().unwrap_or(0).max(1);
        let w = self.cfg.weights;
        for s in g.values_mut() {
            let access = s.access_count as f64 / max_access as f64;
            let hours = now.saturating_sub(s.last_access_ms) as f64 / 3_600_000.0;
            let recency = 1.0 / (1.0 + hours * self.cfg.decay_per_hour);
            let consensus = s.peer_reports as f64 / max_reports as f64;
            let category = category_weight(s.category);
            let randomizer = if s.used_as_randomizer { 1.0 } else { 0.0 };
            s.score = (w.access * access
                + w.recency * recency
                + w.consensus * consensus
                + w.category * category
                + w.randomizer * randomizer)
                .clamp(0.0, 1.0);
            s.trend = s.access_count.saturating_sub(s.prev_sample) as f64;
            s.prev_sample = s.access_count;
        }
    }

    /// Top blocks by score, optionally restricted to one category.
    pub fn popular(&self, count: usize, category: Option<BlockCategory>) -> Vec<BlockId> {
        let Ok(g) = self.state.read() else {
            return Vec::new();
        };
        let mut all: Vec<(BlockId, f64)> = g
            .iter()
            .filter(|(_, s)| category.map_or(true, |c| s.category == c))
            .map(|(id, s)| (*id, s.score))
            .collect();
        all.sort_by(|a, b| b.1.total_cmp(&a.1));
        all.truncate(count);
        all.into_iter().map(|(id, _)| id).collect()
    }

    /// Top blocks by access-count derivative.
    pub fn trending(&self, count: usize) -> Vec<BlockId> {
        let Ok(g) = self.state.read() else {
            return Vec::new();
        };
        let mut all: Vec<(BlockId, f64)> = g.iter().map(|(id, s)| (*id, s.trend)).collect();
        all.sort_by(|a, b| b.1.total_cmp(&a.1));
        all.truncate(count);
        all.into_iter().map(|(id, _)| id).collect()
    }

    /// Candidates for randomizer selection: public-domain and
    /// previously-used-as-randomizer blocks rank first, then score.
    pub fn randomizer_candidates(&self, count: usize) -> Vec<BlockId> {
        let Ok(g) = self.state.read() else {
            return Vec::new();
        };
        let mut all: Vec<(BlockId, f64)> = g
            .iter()
            .map(|(id, s)| {
                let bias = match (s.category == BlockCategory::PublicDomain, s.used_as_randomizer)
                {
                    (true, true) => 2.0,
                    (true, false) | (false, true) => 1.0,
                    (false, false) => 0.0,
                };
                (*id, bias + s.score)
            })
            .collect();
        all.sort_by(|a, b| b.1.total_cmp(&a.1));
        all.truncate(count);
        all.into_iter().map(|(id, _)| id).collect()
    }

    /// Tracked block count.
    pub fn len(&self) -> usize {
        self.state.read().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether nothing is tracked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the periodic refresh loop.
pub fn spawn_popularity_refresh(
    tracker: Arc<PopularityTracker>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let every = tracker.config().refresh_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = tick.tick() => tracker.refresh(now_ms()),
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        warn!("popularity refresh stopped");
    })
}
