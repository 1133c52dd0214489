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

//! Three-tier block cache with prediction-driven promotion.
//!
//! Tiers are hot/warm/cold. A background predictor estimates each key's next
//! access time as `last_access + gap_ewma`, where `gap_ewma` is an
//! exponential moving average over inter-access gaps with alpha 0.3. A key
//! with at least `promote_threshold` accesses inside `prediction_window`
//! becomes a hot candidate. The exchange cycle recomputes tier capacities,
//! promotes, demotes, then evicts from cold only, oldest first, in batches.
//!
//! Eviction ordering is class-major: altruistic entries leave before personal
//! ones tier by tier (cold, warm, hot). With only personal entries this
//! reduces to the plain tier order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::types::{now_ms, BlockId};

/// Smoothing factor for the inter-access-gap EWMA.
const GAP_EWMA_ALPHA: f64 = 0.3;

/// Cache tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTier {
    /// Predicted-soon entries.
    Hot,
    /// Default insertion tier.
    Warm,
    /// Eviction staging tier.
    Cold,
}

impl CacheTier {
    fn rank(self) -> u8 {
        match self {
            CacheTier::Cold => 0,
            CacheTier::Warm => 1,
            CacheTier::Hot => 2,
        }
    }
}

/// Who the entry is cached for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheClass {
    /// Cached for this node's own reads/writes.
    Personal,
    /// Cached on behalf of the network; evicted first under pressure.
    Altruistic,
}

/// Cache configuration (runtime form; built from the config file section).
#[derive(Clone, Debug)]
pub struct AdaptiveCacheConfig {
    /// Total byte budget.
    pub max_bytes: u64,
    /// Total item budget.
    pub max_items: usize,
    /// Fraction of bytes reserved for the hot tier.
    pub hot_ratio: f64,
    /// Fraction of bytes reserved for the warm tier.
    pub warm_ratio: f64,
    /// Window for hot-candidate access counting.
    pub prediction_window: Duration,
    /// Entries removed per eviction round.
    pub eviction_batch: usize,
    /// Promote/demote cycle period.
    pub exchange_interval: Duration,
    /// Predictor period.
    pub prediction_interval: Duration,
    /// Accesses inside the window that make a key a hot candidate.
    pub promote_threshold: u32,
}

impl Default for AdaptiveCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
            max_items: 4096,
            hot_ratio: 0.15,
            warm_ratio: 0.35,
            prediction_window: Duration::from_secs(300),
            eviction_batch: 32,
            exchange_interval: Duration::from_secs(60),
            prediction_interval: Duration::from_secs(30),
            promote_threshold: 3,
        }
    }
}

struct Entry {
    bytes: Vec<u8>,
    tier: CacheTier,
    class: CacheClass,
    last_access_ms: u64,
    access_count: u64,
    // Access timestamps inside the prediction window, oldest first.
    window: VecDeque<u64>,
    gap_ewma_ms: f64,
    predicted_next_ms: u64,
}

impl Entry {
    fn touch(&mut self, now: u64, window: Duration) {
        if self.access_count > 0 {
            let gap = now.saturating_sub(self.last_access_ms) as f64;
            self.gap_ewma_ms = if self.gap_ewma_ms == 0.0 {
                gap
            } else {
                (1.0 - GAP_EWMA_ALPHA) * self.gap_ewma_ms + GAP_EWMA_ALPHA * gap
            };
        }
        self.access_count += 1;
        self.last_access_ms = now;
        self.window.push_back(now);
        let cutoff = now.saturating_sub(window.as_millis() as u64);
        while self.window.front().is_some_and(|&t| t < cutoff) {
            self.window.pop_front();
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<BlockId, Entry>,
    bytes_total: u64,
    bytes_personal: u64,
    bytes_altruistic: u64,
}

impl CacheState {
    fn account_insert(&mut self, class: CacheClass, len: u64) {
        self.bytes_total += len;
        match class {
            CacheClass::Personal => self.bytes_personal += len,
            CacheClass::Altruistic => self.bytes_altruistic += len,
        }
    }

    fn account_remove(&mut self, class: CacheClass, len: u64) {
        self.bytes_total = self.bytes_total.saturating_sub(len);
        match class {
            CacheClass::Personal => self.bytes_personal = self.bytes_personal.saturating_sub(len),
            CacheClass::Altruistic => {
                self.bytes_altruistic = self.bytes_altruistic.saturating_sub(len)
            }
        }
    }
}

/// Outcome of a `put`, reported so the altruistic wrapper can arm its
/// eviction cooldown.
#[derive(Clone, Copy, Debug, Default)]
pub struct PutReport {
    /// Altruistic entries evicted to make room.
    pub evicted_altruistic: usize,
    /// Personal entries evicted to make room.
    pub evicted_personal: usize,
}

/// Aggregate counters for stats endpoints and tests.
#[derive(Clone, Copy, Debug)]
pub struct CacheStats {
    /// Entries resident.
    pub items: usize,
    /// Total resident bytes.
    pub total_bytes: u64,
    /// Personal resident bytes.
    pub personal_bytes: u64,
    /// Altruistic resident bytes.
    pub altruistic_bytes: u64,
    /// Byte budget.
    pub capacity_bytes: u64,
}

/// The tiered cache. All operations take an explicit clock so the promotion
/// and eviction protocol is testable without sleeping.
pub struct AdaptiveCache {
    cfg: AdaptiveCacheConfig,
    state: RwLock<CacheState>,
}

impl AdaptiveCache {
    /// Empty cache.
    pub fn new(cfg: AdaptiveCacheConfig) -> Self {
        Self {
            cfg,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &AdaptiveCacheConfig {
        &self.cfg
    }

    /// Lookup; refreshes recency and the gap EWMA.
    pub fn get(&self, id: &BlockId) -> Option<Vec<u8>> {
        self.get_at(id, now_ms())
    }

    /// Lookup at an explicit clock.
    pub fn get_at(&self, id: &BlockId, now: u64) -> Option<Vec<u8>> {
        let mut g = self.state.write().ok()?;
        let window = self.cfg.prediction_window;
        let e = g.entries.get_mut(id)?;
        e.touch(now, window);
        Some(e.bytes.clone())
    }

    /// Insert into the warm tier; evicts synchronously iff capacity is
    /// exceeded after insertion. Succeeds even if the new entry is itself
    /// immediately evictable.
    pub fn put(&self, id: BlockId, bytes: Vec<u8>, class: CacheClass) -> PutReport {
        self.put_at(id, bytes, class, now_ms())
    }

    /// Insert at an explicit clock.
    pub fn put_at(&self, id: BlockId, bytes: Vec<u8>, class: CacheClass, now: u64) -> PutReport {
        let Ok(mut g) = self.state.write() else {
            return PutReport::default();
        };
        let len = bytes.len() as u64;
        if let Some(old) = g.entries.remove(&id) {
            let (oc, ol) = (old.class, old.bytes.len() as u64);
            g.account_remove(oc, ol);
        }
        let mut entry = Entry {
            bytes,
            tier: CacheTier::Warm,
            class,
            last_access_ms: now,
            access_count: 0,
            window: VecDeque::new(),
            gap_ewma_ms: 0.0,
            predicted_next_ms: now + self.cfg.prediction_window.as_millis() as u64,
        };
        entry.touch(now, self.cfg.prediction_window);
        g.entries.insert(id, entry);
        g.account_insert(class, len);
        self.evict_overflow(&mut g)
    }

    /// Presence test without touching recency.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.state
            .read()
            .map(|g| g.entries.contains_key(id))
            .unwrap_or(false)
    }

    /// Drop everything.
    pub fn clear(&self) {
        if let Ok(mut g) = self.state.write() {
            *g = CacheState::default();
        }
    }

    /// Aggregate counters.
    pub fn stats(&self) -> CacheStats {
        let g = self.state.read();
        match g {
            Ok(g) => CacheStats {
                items: g.entries.len(),
                total_bytes: g.bytes_total,
                personal_bytes: g.bytes_personal,
                altruistic_bytes: g.bytes_altruistic,
                capacity_bytes: self.cfg.max_bytes,
            },
            Err(_) => CacheStats {
                items: 0,
                total_bytes: 0,
                personal_bytes: 0,
                altruistic_bytes: 0,
                capacity_bytes: self.cfg.max_bytes,
            },
        }
    }

    /// Tier of a resident key (tests and the wrapper use this).
    pub fn tier_of(&self, id: &BlockId) -> Option<CacheTier> {
        self.state.read().ok()?.entries.get(id).map(|e| e.tier)
    }

    /// Evict altruistic entries until their resident bytes fit `budget`.
    /// Returns evicted count.
    pub(crate) fn shrink_altruistic_to(&self, budget: u64) -> usize {
        let Ok(mut g) = self.state.write() else {
            return 0;
        };
        let mut evicted = 0usize;
        while g.bytes_altruistic > budget {
            let victim = Self::pick_victim(&g, |e| e.class == CacheClass::Altruistic);
            let Some(id) = victim else { break };
            if let Some(e) = g.entries.remove(&id) {
                let (c, l) = (e.class, e.bytes.len() as u64);
                g.account_remove(c, l);
                evicted += 1;
            }
        }
        evicted
    }

    // Victim choice: class-major (altruistic first), then tier (cold, warm,
    // hot), then oldest last access.
    fn pick_victim<F: Fn(&Entry) -> bool>(g: &CacheState, admit: F) -> Option<BlockId> {
        g.entries
            .iter()
            .filter(|(_, e)| admit(e))
            .min_by(|(_, a), (_, b)| {
                let ka = (a.class == CacheClass::Personal, a.tier.rank(), a.last_access_ms);
                let kb = (b.class == CacheClass::Personal, b.tier.rank(), b.last_access_ms);
                ka.cmp(&kb)
            })
            .map(|(id, _)| *id)
    }

    fn evict_overflow(&self, g: &mut CacheState) -> PutReport {
        let mut report = PutReport::default();
        while g.bytes_total > self.cfg.max_bytes || g.entries.len() > self.cfg.max_items {
            let mut removed = 0usize;
            while removed < self.cfg.eviction_batch
                && (g.bytes_total > self.cfg.max_bytes || g.entries.len() > self.cfg.max_items)
            {
                let Some(id) = Self::pick_victim(g, |_| true) else {
                    return report;
                };
                if let Some(e) = g.entries.remove(&id) {
                    let (c, l) = (e.class, e.bytes.len() as u64);
                    g.account_remove(c, l);
                    match c {
                        CacheClass::Personal => report.evicted_personal += 1,
                        CacheClass::Altruistic => report.evicted_altruistic += 1,
                    }
                    removed += 1;
                }
            }
            if removed == 0 {
                break;
            }
        }
        report
    }

    /// Predictor pass: refresh `predicted_next_ms` for every entry.
    pub fn run_prediction(&self, now: u64) {
        let Ok(mut g) = self.state.write() else {
            return;
        };
        let window_ms = self.cfg.prediction_window.as_millis() as u64;
        for e in g.entries.values_mut() {
            let cutoff = now.saturating_sub(window_ms);
            while e.window.front().is_some_and(|&t| t < cutoff) {
                e.window.pop_front();
            }
            e.predicted_next_ms = if e.gap_ewma_ms > 0.0 {
                e.last_access_ms + e.gap_ewma_ms as u64
            } else {
                e.last_access_ms + window_ms
            };
        }
    }

    /// Exchange pass: recompute tier capacities, promote hot candidates,
    /// demote overflow downward, then evict from cold.
    pub fn run_exchange(&self, now: u64) {
        let Ok(mut g) = self.state.write() else {
            return;
        };
        let hot_cap = (self.cfg.max_bytes as f64 * self.cfg.hot_ratio) as u64;
        let warm_cap = (self.cfg.max_bytes as f64 * self.cfg.warm_ratio) as u64;

        let mut hot_bytes: u64 = 0;
        let mut warm_bytes: u64 = 0;
        for e in g.entries.values() {
            match e.tier {
                CacheTier::Hot => hot_bytes += e.bytes.len() as u64,
                CacheTier::Warm => warm_bytes += e.bytes.len() as u64,
                CacheTier::Cold => {}
            }
        }

        // Promote: candidates with enough in-window accesses, soonest
        // predicted access first, until hot is full.
        let mut candidates: Vec<(BlockId, u64, u64)> = g
            .entries
            .iter()
            .filter(|(_, e)| {
                e.tier != CacheTier::Hot && e.window.len() as u32 >= self.cfg.promote_threshold
            })
            .map(|(id, e)| (*id, e.predicted_next_ms, e.bytes.len() as u64))
            .collect();
        candidates.sort_by_key(|&(_, predicted, _)| predicted);
        for (id, _, len) in candidates {
            if hot_bytes + len > hot_cap {
                break;
            }
            if let Some(e) = g.entries.get_mut(&id) {
                if e.tier == CacheTier::Warm {
                    warm_bytes = warm_bytes.saturating_sub(len);
                }
                e.tier = CacheTier::Hot;
                hot_bytes += len;
            }
        }

        // Demote hot overflow to warm. Lowest score leaves first: fewest
        // in-window accesses, then oldest last access.
        while hot_bytes > hot_cap {
            let victim = g
                .entries
                .iter()
                .filter(|(_, e)| e.tier == CacheTier::Hot)
                .min_by_key(|(_, e)| (e.window.len(), e.last_access_ms))
                .map(|(id, e)| (*id, e.bytes.len() as u64));
            let Some((id, len)) = victim else { break };
            if let Some(e) = g.entries.get_mut(&id) {
                e.tier = CacheTier::Warm;
            }
            hot_bytes = hot_bytes.saturating_sub(len);
            warm_bytes += len;
        }

        // Demote warm overflow to cold, same ordering.
        while warm_bytes > warm_cap {
            let victim = g
                .entries
                .iter()
                .filter(|(_, e)| e.tier == CacheTier::Warm)
                .min_by_key(|(_, e)| (e.window.len(), e.last_access_ms))
                .map(|(id, e)| (*id, e.bytes.len() as u64));
            let Some((id, len)) = victim else { break };
            if let Some(e) = g.entries.get_mut(&id) {
                e.tier = CacheTier::Cold;
            }
            warm_bytes = warm_bytes.saturating_sub(len);
        }

        let report = self.evict_overflow(&mut g);
        if report.evicted_altruistic + report.evicted_personal > 0 {
            debug!(
                altruistic = report.evicted_altruistic,
                personal = report.evicted_personal,
                now,
                "exchange eviction"
            );
        }
    }
}

/// Spawn the prediction/exchange maintenance loop.
pub fn spawn_cache_maintenance(
    cache: Arc<AdaptiveCache>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let prediction_every = cache.config().prediction_interval;
    let exchange_every = cache.config().exchange_interval;
    tokio::spawn(async move {
        let mut predict = tokio::time::interval(prediction_every);
        let mut exchange = tokio::time::interval(exchange_every);
        loop {
            tokio::select! {
                _ = predict.tick() => {
                    cache.run_prediction(now_ms());
                }
                _ = exchange.tick() => {
                    cache.run_exchange(now_ms());
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        warn!("cache maintenance stopped");
    })
}
