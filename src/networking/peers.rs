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

//! Peer table with rolling metrics and multi-strategy selection.
//!
//! A peer is healthy iff it was seen within the last five minutes, its
//! success rate is at least 0.5, and its latency EWMA is under ten seconds.
//! Metrics use exponential moving averages with alpha 0.1. Selection
//! strategies: performance (scored top-k), randomizer (inventory-driven),
//! privacy (uniform over high-success peers), hybrid (60% performance,
//! 40% privacy).

use libp2p::PeerId;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::bloom::AvailabilityTracker;
use crate::core::types::{now_ms, BlockId};

/// EWMA smoothing factor for latency and bandwidth.
const METRIC_ALPHA: f64 = 0.1;
/// Health bounds.
const HEALTH_LAST_SEEN_MS: u64 = 5 * 60 * 1000;
const HEALTH_MIN_SUCCESS: f64 = 0.5;
const HEALTH_MAX_LATENCY_MS: f64 = 10_000.0;
/// Peers with fewer requests than this score a neutral 0.5.
const MIN_SAMPLES: u64 = 5;
/// Success floor for privacy-strategy eligibility.
const PRIVACY_MIN_SUCCESS: f64 = 0.7;

/// Rolling per-peer counters and averages.
#[derive(Clone, Debug, Default)]
pub struct PeerMetrics {
    /// Latency EWMA in ms.
    pub latency_ms: f64,
    /// Bandwidth EWMA in bytes/sec.
    pub bandwidth_bps: f64,
    /// Requests issued.
    pub requests: u64,
    /// Requests succeeded.
    pub successes: u64,
    /// Payload bytes moved.
    pub bytes: u64,
    /// Cumulative request time in ms.
    pub total_time_ms: u64,
}

impl PeerMetrics {
    /// successes/requests; optimistic 1.0 before any sample.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

/// One peer's record. Owned solely by the manager; never handed out by
/// reference.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// Peer identity.
    pub id: PeerId,
    /// Last sighting, ms since UNIX epoch.
    pub last_seen_ms: u64,
    /// Whether a connection is currently up.
    pub connected: bool,
    /// Times this peer has connected.
    pub connection_count: u32,
    /// Rolling metrics.
    pub metrics: PeerMetrics,
    /// Usefulness as a randomizer source (popularity x reuse signal,
    /// reported via gossip).
    pub randomizer_score: f64,
}

impl PeerInfo {
    fn new(id: PeerId, now: u64) -> Self {
        Self {
            id,
            last_seen_ms: now,
            connected: false,
            connection_count: 0,
            metrics: PeerMetrics::default(),
            randomizer_score: 0.0,
        }
    }

    /// Health predicate.
    pub fn healthy(&self, now: u64) -> bool {
        now.saturating_sub(self.last_seen_ms) < HEALTH_LAST_SEEN_MS
            && self.metrics.success_rate() >= HEALTH_MIN_SUCCESS
            && self.metrics.latency_ms < HEALTH_MAX_LATENCY_MS
    }

    /// Composite performance score in [0,1]; neutral 0.5 under `MIN_SAMPLES`.
    pub fn performance_score(&self) -> f64 {
        if self.metrics.requests < MIN_SAMPLES {
            return 0.5;
        }
        let latency_s = self.metrics.latency_ms / 1000.0;
        let bw_mbps = self.metrics.bandwidth_bps / 1_000_000.0;
        0.4 * (1.0 / (1.0 + latency_s))
            + 0.3 * (bw_mbps / 10.0).min(1.0)
            + 0.3 * self.metrics.success_rate()
    }
}

/// Selection strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Highest composite score.
    Performance,
    /// Holders of wanted blocks, ranked by randomizer usefulness.
    Randomizer,
    /// Uniform random over high-success peers; no ordering leakage.
    Privacy,
    /// 60% performance slots, 40% privacy slots, deduplicated.
    Hybrid,
}

/// Selection criteria.
#[derive(Clone, Debug, Default)]
pub struct SelectionCriteria {
    /// Peers wanted.
    pub count: usize,
    /// Bandwidth floor in bytes/sec.
    pub min_bandwidth_bps: Option<f64>,
    /// Latency ceiling in ms.
    pub max_latency_ms: Option<f64>,
    /// Blocks the peer should hold (randomizer strategy).
    pub required_blocks: Vec<BlockId>,
    /// Peers never returned.
    pub exclude: Vec<PeerId>,
    /// Rank known randomizer sources ahead of equally-scored peers.
    pub prefer_randomizers: bool,
    /// Restrict any strategy to the privacy-eligible set (success >= 0.7).
    pub require_privacy: bool,
    /// Shuffle the returned order to spread load across equal picks.
    pub load_balance: bool,
}

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct PeerManagerConfig {
    /// Health sweep period.
    pub health_interval: Duration,
    /// Stale-record sweep period.
    pub cleanup_interval: Duration,
    /// Disconnected records older than this are dropped.
    pub metric_retention: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            metric_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// The peer manager. Sole owner of peer records and their inventory
/// summaries.
pub struct PeerManager {
    cfg: PeerManagerConfig,
    peers: RwLock<HashMap<PeerId, PeerInfo>>,
    availability: AvailabilityTracker,
}

impl PeerManager {
    /// Empty table.
    pub fn new(cfg: PeerManagerConfig) -> Self {
        Self {
            cfg,
            peers: RwLock::new(HashMap::new()),
            availability: AvailabilityTracker::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PeerManagerConfig {
        &self.cfg
    }

    /// Connection established.
    pub fn on_connected(&self, id: PeerId) {
        let now = now_ms();
        if let Ok(mut g) = self.peers.write() {
            let p = g.entry(id).or_insert_with(|| PeerInfo::new(id, now));
            p.connected = true;
            p.connection_count += 1;
            p.last_seen_ms = now;
        }
    }

    /// Connection closed.
    pub fn on_disconnected(&self, id: &PeerId) {
        if let Ok(mut g) = self.peers.write() {
            if let Some(p) = g.get_mut(id) {
                p.connected = false;
            }
        }
    }

    /// Fold one request outcome into the peer's EWMAs.
    pub fn record_request(&self, id: &PeerId, ok: bool, bytes: u64, elapsed: Duration) {
        let now = now_ms();
        let Ok(mut g) = self.peers.write() else {
            return;
        };
        let p = g.entry(*id).or_insert_with(|| PeerInfo::new(*id, now));
        let sample_ms = elapsed.as_millis() as f64;
        let m = &mut p.metrics;
        m.requests += 1;
        if ok {
            m.successes += 1;
        }
        m.bytes += bytes;
        m.total_time_ms += sample_ms as u64;
        m.latency_ms = if m.requests == 1 {
            sample_ms
        } else {
            (1.0 - METRIC_ALPHA) * m.latency_ms + METRIC_ALPHA * sample_ms
        };
        if sample_ms > 0.0 && bytes > 0 {
            let bps = bytes as f64 / (sample_ms / 1000.0);
            m.bandwidth_bps = if m.bandwidth_bps == 0.0 {
                bps
            } else {
                (1.0 - METRIC_ALPHA) * m.bandwidth_bps + METRIC_ALPHA * bps
            };
        }
        p.last_seen_ms = now;
    }

    /// Replace a peer's inventory summary from gossip.
    pub fn update_inventory(&self, id: &PeerId, blocks: &[BlockId], randomizer_score: f64) {
        let now = now_ms();
        self.availability.update_inventory(&id.to_bytes(), blocks);
        if let Ok(mut g) = self.peers.write() {
            let p = g.entry(*id).or_insert_with(|| PeerInfo::new(*id, now));
            p.randomizer_score = randomizer_score;
            p.last_seen_ms = now;
        }
    }

    /// Peers whose summaries test positive for `id` (probabilistic upper
    /// bound).
    pub fn peers_with(&self, id: &BlockId) -> Vec<Vec<u8>> {
        self.availability.peers_with(id)
    }

    /// Snapshot one peer (tests, stats).
    pub fn peer(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.read().ok()?.get(id).cloned()
    }

    /// Connected peer count.
    pub fn connected_count(&self) -> usize {
        self.peers
            .read()
            .map(|g| g.values().filter(|p| p.connected).count())
            .unwrap_or(0)
    }

    /// Select peers per strategy and criteria. Never returns an unhealthy,
    /// disconnected, or excluded peer.
    pub fn select_peers(
        &self,
        strategy: SelectionStrategy,
        criteria: &SelectionCriteria,
    ) -> Vec<PeerId> {
        let now = now_ms();
        let Ok(g) = self.peers.read() else {
            return Vec::new();
        };
        let eligible: Vec<&PeerInfo> = g
            .values()
            .filter(|p| p.connected && p.healthy(now))
            .filter(|p| !criteria.exclude.contains(&p.id))
            .filter(|p| {
                criteria
                    .min_bandwidth_bps
                    .map_or(true, |min| p.metrics.bandwidth_bps >= min)
            })
            .filter(|p| {
                criteria
                    .max_latency_ms
                    .map_or(true, |max| p.metrics.latency_ms <= max)
            })
            .filter(|p| {
                !criteria.require_privacy || p.metrics.success_rate() >= PRIVACY_MIN_SUCCESS
            })
            .collect();

        let mut picked = match strategy {
            SelectionStrategy::Performance => Self::by_performance(&eligible, criteria.count),
            SelectionStrategy::Randomizer => {
                self.by_randomizer(&eligible, criteria)
            }
            SelectionStrategy::Privacy => Self::by_privacy(&eligible, criteria.count),
            SelectionStrategy::Hybrid => {
                let perf_slots = (criteria.count * 6).div_ceil(10);
                let mut picked = Self::by_performance(&eligible, perf_slots);
                for id in Self::by_privacy(&eligible, criteria.count) {
                    if picked.len() >= criteria.count {
                        break;
                    }
                    if !picked.contains(&id) {
                        picked.push(id);
                    }
                }
                picked.truncate(criteria.count);
                picked
            }
        };

        if criteria.prefer_randomizers && strategy != SelectionStrategy::Privacy {
            // Stable partition: known randomizer sources first, everything
            // else in its original order.
            let scores: std::collections::HashMap<PeerId, f64> = picked
                .iter()
                .filter_map(|id| g.get(id).map(|p| (*id, p.randomizer_score)))
                .collect();
            picked.sort_by(|a, b| {
                let ra = scores.get(a).copied().unwrap_or(0.0) > 0.0;
                let rb = scores.get(b).copied().unwrap_or(0.0) > 0.0;
                rb.cmp(&ra)
            });
        }
        if criteria.load_balance {
            picked.shuffle(&mut rand::thread_rng());
        }
        picked
    }

    fn by_performance(eligible: &[&PeerInfo], count: usize) -> Vec<PeerId> {
        let mut scored: Vec<(f64, PeerId)> = eligible
            .iter()
            .map(|p| (p.performance_score(), p.id))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().take(count).map(|(_, id)| id).collect()
    }

    fn by_randomizer(&self, eligible: &[&PeerInfo], criteria: &SelectionCriteria) -> Vec<PeerId> {
        let mut scored: Vec<(f64, f64, PeerId)> = eligible
            .iter()
            .filter(|p| {
                criteria.required_blocks.is_empty()
                    || self
                        .availability
                        .peer_has_any(&p.id.to_bytes(), &criteria.required_blocks)
            })
            .map(|p| (p.randomizer_score, p.performance_score(), p.id))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.total_cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        scored
            .into_iter()
            .take(criteria.count)
            .map(|(_, _, id)| id)
            .collect()
    }

    fn by_privacy(eligible: &[&PeerInfo], count: usize) -> Vec<PeerId> {
        let mut pool: Vec<PeerId> = eligible
            .iter()
            .filter(|p| p.metrics.success_rate() >= PRIVACY_MIN_SUCCESS)
            .map(|p| p.id)
            .collect();
        pool.shuffle(&mut rand::thread_rng());
        pool.truncate(count);
        pool
    }

    /// Mark peers failing the health predicate as disconnected. Returns how
    /// many were closed.
    pub fn sweep_health(&self) -> usize {
        let now = now_ms();
        let Ok(mut g) = self.peers.write() else {
            return 0;
        };
        let mut closed = 0usize;
        for p in g.values_mut() {
            if p.connected && !p.healthy(now) {
                p.connected = false;
                closed += 1;
            }
        }
        closed
    }

    /// Drop disconnected records older than `metric_retention`.
    pub fn sweep_stale(&self) -> usize {
        let cutoff = now_ms().saturating_sub(self.cfg.metric_retention.as_millis() as u64);
        let Ok(mut g) = self.peers.write() else {
            return 0;
        };
        let before = g.len();
        let dropped: Vec<PeerId> = g
            .iter()
            .filter(|(_, p)| !p.connected && p.last_seen_ms < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &dropped {
            g.remove(id);
            self.availability.remove(&id.to_bytes());
        }
        before - g.len()
    }
}

/// Spawn the health + cleanup loops.
pub fn spawn_peer_maintenance(
    manager: Arc<PeerManager>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let health_every = manager.config().health_interval;
    let cleanup_every = manager.config().cleanup_interval;
    tokio::spawn(async move {
        let mut health = tokio::time::interval(health_every);
        let mut cleanup = tokio::time::interval(cleanup_every);
        loop {
            tokio::select! {
                _ = health.tick() => {
                    let closed = manager.sweep_health();
                    if closed > 0 {
                        debug!(closed, "unhealthy peers closed");
                    }
                }
                _ = cleanup.tick() => {
                    let dropped = manager.sweep_stale();
                    if dropped > 0 {
                        debug!(dropped, "stale peer records dropped");
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        warn!("peer maintenance stopped");
    })
}
