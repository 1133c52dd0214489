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

//! Request mixer: batches real fetches with decoys, re-orders them, applies
//! timing jitter, and fans out across relays.
//!
//! The batching loop is a single long-lived task consuming a bounded
//! channel; no state is shared across batches. Output order is deliberately
//! not FIFO - callers correlate by their receiver. A dispatched batch has
//! between `min_mix_size` and `max_mix_size` entries: decoys pad
//! under-filled batches at timeout, repeating known popular targets when
//! the tracker holds fewer than requested. The one exception is a tracker
//! that knows no blocks at all, which leaves nothing to decoy with.
//! High-priority requests move to the batch head but still wait at least
//! `mixing_delay` from submission.
//!
//! Cancellation: dropping the returned receiver before dispatch drops the
//! request; once dispatched the response is still consumed and cached.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::relay::{RelayClient, RelayError};
use crate::core::blocks::Block;
use crate::core::cache::AltruisticCache;
use crate::core::pool::PopularityTracker;
use crate::monitoring::metrics::Metrics;

/// Mixer errors, as seen by callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MixerError {
    /// Queue at capacity; retry or fall back to a direct store read.
    #[error("busy")]
    Busy,
    /// Mixer task gone.
    #[error("closed")]
    Closed,
    /// Relay layer failed for this request.
    #[error("relay: {0}")]
    Relay(String),
    /// Block absent at the relay.
    #[error("not found")]
    NotFound,
}

/// Request priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Normal batch position.
    Normal,
    /// Jumps to the batch head, still honoring the mixing delay.
    High,
}

/// Mixer configuration (runtime form of the `mixing` config section).
#[derive(Clone, Debug)]
pub struct MixerConfig {
    /// Batch floor.
    pub min_mix_size: usize,
    /// Batch ceiling.
    pub max_mix_size: usize,
    /// Max wait before dispatching an under-filled batch.
    pub batch_timeout: Duration,
    /// Decoys interleaved per batch as a fraction of real entries.
    pub cover_ratio: f64,
    /// Per-request dispatch jitter upper bound.
    pub temporal_jitter: Duration,
    /// Minimum hold time for any request.
    pub mixing_delay: Duration,
    /// Bounded queue capacity.
    pub max_concurrent: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            min_mix_size: 4,
            max_mix_size: 16,
            batch_timeout: Duration::from_millis(500),
            cover_ratio: 0.25,
            temporal_jitter: Duration::from_millis(250),
            mixing_delay: Duration::from_millis(100),
            max_concurrent: 64,
        }
    }
}

struct MixRequest {
    block_id: crate::core::types::BlockId,
    priority: Priority,
    submitted: Instant,
    responder: oneshot::Sender<Result<Block, MixerError>>,
}

/// Caller handle to the mixer.
pub struct RequestMixer {
    tx: mpsc::Sender<MixRequest>,
}

impl RequestMixer {
    /// Start the batching task and return the handle plus its join handle.
    pub fn start(
        cfg: MixerConfig,
        relay: Arc<RelayClient>,
        popularity: Arc<PopularityTracker>,
        cache: Arc<AltruisticCache>,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(cfg.max_concurrent);
        let task = MixerTask {
            cfg,
            relay,
            popularity,
            cache,
            metrics,
        };
        let handle = tokio::spawn(task.run(rx, shutdown));
        (Self { tx }, handle)
    }

    /// Submit a block fetch. Returns `Busy` when the queue is full; the
    /// receiver resolves once the mixed batch containing the request has
    /// been dispatched and answered. Dropping the receiver before dispatch
    /// cancels the request.
    pub fn submit(
        &self,
        block_id: crate::core::types::BlockId,
        priority: Priority,
    ) -> Result<oneshot::Receiver<Result<Block, MixerError>>, MixerError> {
        let (responder, receiver) = oneshot::channel();
        let req = MixRequest {
            block_id,
            priority,
            submitted: Instant::now(),
            responder,
        };
        match self.tx.try_send(req) {
            Ok(()) => Ok(receiver),
            Err(mpsc::error::TrySendError::Full(_)) => Err(MixerError::Busy),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MixerError::Closed),
        }
    }
}

struct MixerTask {
    cfg: MixerConfig,
    relay: Arc<RelayClient>,
    popularity: Arc<PopularityTracker>,
    cache: Arc<AltruisticCache>,
    metrics: Arc<Metrics>,
}

impl MixerTask {
    async fn run(
        self,
        mut rx: mpsc::Receiver<MixRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backlog: Vec<MixRequest> = Vec::new();
        loop {
            // Idle until the batch opener arrives; the timeout clock starts
            // with it.
            if backlog.is_empty() {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(req) => backlog.push(req),
                            None => {
                                warn!("mixer channel closed; stopping");
                                return;
                            }
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            return;
                        }
                        continue;
                    }
                }
            }

            // Collect until the batch floor is reached or the timeout since
            // the batch opener elapses.
            let deadline = Instant::now() + self.cfg.batch_timeout;
            while backlog.len() < self.cfg.min_mix_size {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(req) => backlog.push(req),
                            None => {
                                warn!("mixer channel closed; stopping");
                                self.flush_failures(backlog).await;
                                return;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(deadline), if !backlog.is_empty() => break,
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            self.flush_failures(backlog).await;
                            return;
                        }
                    }
                }
            }

            // Drop requests cancelled while queued.
            backlog.retain(|r| !r.responder.is_closed());
            if backlog.is_empty() {
                continue;
            }

            // Admit up to the ceiling; the rest waits for the next batch.
            let take = backlog.len().min(self.cfg.max_mix_size);
            let mut batch: Vec<MixRequest> = backlog.drain(..take).collect();
            batch.sort_by(|a, b| b.priority.cmp(&a.priority));

            self.dispatch_batch(batch).await;
        }
    }

    async fn flush_failures(&self, backlog: Vec<MixRequest>) {
        for req in backlog {
            let _ = req.responder.send(Err(MixerError::Closed));
        }
    }

    async fn dispatch_batch(&self, batch: Vec<MixRequest>) {
        // Interleave decoys: at least enough to reach the batch floor, plus
        // the configured cover fraction.
        let cover_from_ratio = (batch.len() as f64 * self.cfg.cover_ratio).ceil() as usize;
        let cover_min = self.cfg.min_mix_size.saturating_sub(batch.len());
        let cover_budget = self.cfg.max_mix_size.saturating_sub(batch.len());
        let cover_count = cover_from_ratio.max(cover_min).min(cover_budget);
        let mut decoys = self.popularity.popular(cover_count, None);
        // The tracker may know fewer blocks than asked. Repeat known targets
        // until the floor is met: a repeated fetch of a popular block is
        // indistinguishable from real traffic. Only an empty tracker leaves
        // a batch under the floor.
        if !decoys.is_empty() {
            let known = decoys.len();
            let mut i = 0usize;
            while batch.len() + decoys.len() < self.cfg.min_mix_size
                && decoys.len() < cover_budget
            {
                let repeat = decoys[i % known];
                decoys.push(repeat);
                i += 1;
            }
        }

        enum Slot {
            Real(MixRequest),
            Decoy(crate::core::types::BlockId),
        }
        // Decoys land at random positions; real entries keep their priority
        // order relative to each other.
        let mut slots: Vec<Slot> = batch.into_iter().map(Slot::Real).collect();
        {
            let mut rng = rand::thread_rng();
            for id in decoys {
                let at = rng.gen_range(0..=slots.len());
                slots.insert(at, Slot::Decoy(id));
            }
        }

        let size = slots.len();
        debug!(size, "mixer batch dispatch");
        self.metrics.mixer_batches_total.inc();

        let mut tasks = Vec::with_capacity(size);
        for slot in slots {
            let relay = self.relay.clone();
            let cache = self.cache.clone();
            let metrics = self.metrics.clone();
            let jitter = self.jitter();
            let delay_floor = self.cfg.mixing_delay;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(jitter).await;
                match slot {
                    Slot::Decoy(id) => {
                        let _ = relay.request_block(&id, 0, true).await;
                        metrics.cover_requests_total.inc();
                    }
                    Slot::Real(req) => {
                        // Every real request waits at least the mixing delay
                        // from submission, priority or not.
                        let held = req.submitted.elapsed();
                        if held < delay_floor {
                            tokio::time::sleep(delay_floor - held).await;
                        }
                        let result = match relay.request_block(&req.block_id, 1, false).await {
                            Ok(Some(block)) => Ok(block),
                            Ok(None) => Err(MixerError::NotFound),
                            Err(RelayError::Unhealthy) => {
                                Err(MixerError::Relay("unhealthy".to_string()))
                            }
                            Err(e) => Err(MixerError::Relay(e.to_string())),
                        };
                        metrics.real_requests_total.inc();
                        if let Ok(block) = &result {
                            // Cancelled-after-dispatch responses still land
                            // in the cache.
                            cache.put_personal(block.id(), block.bytes().to_vec());
                        }
                        let _ = req.responder.send(result);
                    }
                }
            }));
        }
        for t in tasks {
            let _ = t.await;
        }
    }

    fn jitter(&self) -> Duration {
        if self.cfg.temporal_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.cfg.temporal_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
