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

//! Cover traffic: decoy requests for popular blocks, indistinguishable from
//! real fetches, emitted on an interval with per-request jitter under a
//! bandwidth ceiling. Pauses while the relay pool has no healthy member.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::relay::{RelayClient, RelayError};
use crate::core::pool::PopularityTracker;
use crate::core::types::now_ms;
use crate::monitoring::metrics::Metrics;

/// Generator configuration (runtime form of the `mixing` config section's
/// cover knobs).
#[derive(Clone, Debug)]
pub struct CoverConfig {
    /// Target cover/(cover+real) ratio.
    pub noise_ratio: f64,
    /// Fewest decoys per interval.
    pub min_requests: usize,
    /// Most decoys per interval.
    pub max_requests: usize,
    /// Emission period.
    pub interval: Duration,
    /// Per-request jitter upper bound.
    pub random_delay: Duration,
    /// Bandwidth ceiling in bytes/sec.
    pub bandwidth_limit: u64,
    /// Block size assumed per decoy for the bandwidth bound.
    pub block_size: usize,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            noise_ratio: 0.3,
            min_requests: 1,
            max_requests: 5,
            interval: Duration::from_secs(10),
            random_delay: Duration::from_secs(2),
            bandwidth_limit: 1_048_576,
            block_size: crate::core::blocks::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// The cover traffic generator.
pub struct CoverTrafficGenerator {
    cfg: CoverConfig,
    popularity: Arc<PopularityTracker>,
    relay: Arc<RelayClient>,
    metrics: Arc<Metrics>,
    active: AtomicBool,
    // Bytes emitted in the current one-second accounting slot.
    slot_start_ms: AtomicU64,
    slot_bytes: AtomicU64,
}

impl CoverTrafficGenerator {
    /// Generator pulling decoy targets from `popularity` and dispatching
    /// through `relay`.
    pub fn new(
        cfg: CoverConfig,
        popularity: Arc<PopularityTracker>,
        relay: Arc<RelayClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cfg,
            popularity,
            relay,
            metrics,
            active: AtomicBool::new(false),
            slot_start_ms: AtomicU64::new(0),
            slot_bytes: AtomicU64::new(0),
        }
    }

    /// Whether decoys were dispatched recently (feeds the privacy score).
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Achieved noise ratio over the client's sliding window.
    pub fn achieved_ratio(&self) -> f64 {
        self.relay.noise_window().ratio()
    }

    fn within_bandwidth(&self, bytes: u64) -> bool {
        let now = now_ms();
        let slot = self.slot_start_ms.load(Ordering::Relaxed);
        if now.saturating_sub(slot) >= 1000 {
            self.slot_start_ms.store(now, Ordering::Relaxed);
            self.slot_bytes.store(0, Ordering::Relaxed);
        }
        let used = self.slot_bytes.load(Ordering::Relaxed);
        if used.saturating_add(bytes) > self.cfg.bandwidth_limit {
            return false;
        }
        self.slot_bytes.fetch_add(bytes, Ordering::Relaxed);
        true
    }

    /// One emission round: pick decoy targets, jitter each, dispatch. Public
    /// so tests can drive rounds without the timer.
    pub async fn emit_round(&self) {
        // Stay near the target ratio: skip rounds while the window is
        // already noisy enough.
        let (real, cover) = self.relay.noise_window().counts();
        let total = real + cover;
        if total > 0 && (cover as f64 / total as f64) >= self.cfg.noise_ratio * 2.0 {
            return;
        }

        let n = rand::thread_rng().gen_range(self.cfg.min_requests..=self.cfg.max_requests.max(self.cfg.min_requests));
        let targets = self.popularity.popular(n, None);
        if targets.is_empty() {
            return;
        }
        for id in targets {
            if !self.within_bandwidth(self.cfg.block_size as u64) {
                debug!("cover emission trimmed by bandwidth ceiling");
                break;
            }
            let jitter_ms = if self.cfg.random_delay.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=self.cfg.random_delay.as_millis() as u64)
            };
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            match self.relay.request_block(&id, 0, true).await {
                Ok(_) => {
                    self.metrics.cover_requests_total.inc();
                    self.active.store(true, Ordering::Relaxed);
                }
                Err(RelayError::Unhealthy) => {
                    warn!("cover traffic paused: no healthy relay");
                    self.metrics.relay_unhealthy_total.inc();
                    self.active.store(false, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    debug!(err = %e, "cover request failed");
                }
            }
        }
    }
}

/// Spawn the emission loop.
pub fn spawn_cover_traffic(
    generator: Arc<CoverTrafficGenerator>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let every = generator.cfg.interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = tick.tick() => generator.emit_round().await,
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        warn!("cover traffic stopped");
    })
}
