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

//! Health-tracked relay set with load balancing.
//!
//! Startup brings the pool to `min_relays` from the configured endpoint
//! list; a periodic probe marks failing relays unhealthy and replaces them
//! from the remaining candidates.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::crypto::{RelayIdentity, SessionBox};
use super::protocol::{
    BlockResponse, HealthCheck, MessageType, RelayEnvelope, RelayPayload, ReplayGuard,
};
use crate::core::blocks::Block;
use crate::core::store::{BlockStore, StoreError};
use crate::core::types::{now_ms, BlockAddress, BlockId};

/// Relay errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// No healthy relay available.
    #[error("no healthy relay")]
    Unhealthy,
    /// Transport failed.
    #[error("transport")]
    Transport,
    /// Reply failed authentication or parsing.
    #[error("crypto")]
    Crypto,
    /// Relay reported failure.
    #[error("remote: {0}")]
    Remote(String),
}

/// Load-balance strategy; the closed set from the config surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// Uniform random among healthy relays.
    Random,
    /// Rotate through healthy relays.
    RoundRobin,
    /// Weight inversely by latency EWMA.
    LatencyWeighted,
}

impl FromStr for LoadBalanceStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            "latency_weighted" => Ok(Self::LatencyWeighted),
            _ => Err(()),
        }
    }
}

/// One relay's record.
#[derive(Clone, Debug)]
pub struct RelayInfo {
    /// Endpoint string (transport-specific).
    pub endpoint: String,
    /// Latency EWMA in ms.
    pub latency_ms: f64,
    /// successes/requests.
    pub success_rate: f64,
    /// Last probe, ms since UNIX epoch.
    pub last_check_ms: u64,
    /// Probe verdict.
    pub healthy: bool,
    requests: u64,
    successes: u64,
}

impl RelayInfo {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            latency_ms: 0.0,
            success_rate: 1.0,
            last_check_ms: 0,
            healthy: true,
            requests: 0,
            successes: 0,
        }
    }

    fn record(&mut self, ok: bool, latency_ms: f64) {
        self.requests += 1;
        if ok {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.requests as f64;
        self.latency_ms = if self.latency_ms == 0.0 {
            latency_ms
        } else {
            0.9 * self.latency_ms + 0.1 * latency_ms
        };
    }
}

/// Pool configuration (runtime form of the `relay` config section).
#[derive(Clone, Debug)]
pub struct RelayPoolConfig {
    /// Upper bound on active relays.
    pub max_relays: usize,
    /// Startup target.
    pub min_relays: usize,
    /// Probe period.
    pub health_check_interval: Duration,
    /// Drop relays unprobed for this long.
    pub max_relay_age: Duration,
    /// Balancing policy.
    pub strategy: LoadBalanceStrategy,
}

impl Default for RelayPoolConfig {
    fn default() -> Self {
        Self {
            max_relays: 8,
            min_relays: 2,
            health_check_interval: Duration::from_secs(30),
            max_relay_age: Duration::from_secs(3600),
            strategy: LoadBalanceStrategy::LatencyWeighted,
        }
    }
}

/// Message transport to a relay endpoint. The network transport itself is an
/// external collaborator; in-process deployments answer from a block store.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Deliver an envelope and wait for the reply envelope.
    async fn exchange(
        &self,
        endpoint: &str,
        envelope: RelayEnvelope,
    ) -> Result<RelayEnvelope, RelayError>;
}

/// Transport that serves block requests straight from a store, standing in
/// for a remote relay. Each exchange decrypts with the pool's own session,
/// so the relay side of the protocol is exercised end to end.
pub struct StoreRelayTransport {
    store: Arc<dyn BlockStore>,
    identity: RelayIdentity,
    client_public: [u8; 32],
    replay: ReplayGuard,
}

impl StoreRelayTransport {
    /// Transport answering from `store`, trusting `client_public`.
    pub fn new(store: Arc<dyn BlockStore>, client_public: [u8; 32]) -> Self {
        Self {
            store,
            identity: RelayIdentity::generate(),
            client_public,
            replay: ReplayGuard::new(),
        }
    }

    /// The relay-side public key clients must box against.
    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }

    fn session(&self) -> Result<SessionBox, RelayError> {
        self.identity
            .session(&self.client_public)
            .map_err(|_| RelayError::Crypto)
    }

    async fn serve_block(&self, endpoint: &str, block_id: &str) -> BlockResponse {
        let started = now_ms();
        let Some(id) = BlockId::from_base58(block_id) else {
            return BlockResponse {
                block_id: block_id.to_string(),
                data: None,
                success: false,
                err: Some("bad id".to_string()),
                latency_ms: 0,
                relay_id: endpoint.to_string(),
                timestamp_ms: now_ms() as i64,
            };
        };
        let addr = BlockAddress::for_id(self.store.backend(), id);
        let (data, success, err) = match self.store.get(&addr).await {
            Ok(block) => (Some(hex::encode(block.bytes())), true, None),
            Err(StoreError::NotFound) => (None, false, Some("not found".to_string())),
            Err(_) => (None, false, Some("unavailable".to_string())),
        };
        BlockResponse {
            block_id: block_id.to_string(),
            data,
            success,
            err,
            latency_ms: now_ms().saturating_sub(started),
            relay_id: endpoint.to_string(),
            timestamp_ms: now_ms() as i64,
        }
    }
}

#[async_trait]
impl RelayTransport for StoreRelayTransport {
    async fn exchange(
        &self,
        endpoint: &str,
        envelope: RelayEnvelope,
    ) -> Result<RelayEnvelope, RelayError> {
        self.replay
            .check(
                &self.client_public,
                &envelope.id,
                envelope.timestamp_ms,
                now_ms() as i64,
            )
            .map_err(|_| RelayError::Transport)?;
        let session = self.session()?;
        let plain = session
            .open(&envelope.ciphertext)
            .map_err(|_| RelayError::Crypto)?;
        let payload: RelayPayload =
            serde_json::from_slice(&plain).map_err(|_| RelayError::Crypto)?;

        let reply = match payload {
            RelayPayload::BlockRequest(req) => {
                RelayPayload::BlockResponse(self.serve_block(endpoint, &req.block_id).await)
            }
            RelayPayload::HealthCheck(_) => RelayPayload::HealthCheck(HealthCheck {
                timestamp_ms: now_ms() as i64,
                test_block: None,
            }),
            RelayPayload::CoverRequest(_) => {
                // Cover fan-out terminates here; acknowledge with a probe.
                RelayPayload::HealthCheck(HealthCheck {
                    timestamp_ms: now_ms() as i64,
                    test_block: None,
                })
            }
            _ => {
                return Err(RelayError::Transport);
            }
        };

        let body = serde_json::to_vec(&reply).map_err(|_| RelayError::Crypto)?;
        let (ciphertext, _nonce) = session.seal(&body).map_err(|_| RelayError::Crypto)?;
        Ok(RelayEnvelope {
            msg_type: reply.message_type(),
            id: envelope.id,
            timestamp_ms: now_ms() as i64,
            ciphertext,
        })
    }
}

/// The relay pool.
pub struct RelayPool {
    cfg: RelayPoolConfig,
    transport: Arc<dyn RelayTransport>,
    active: RwLock<Vec<RelayInfo>>,
    candidates: RwLock<Vec<String>>,
    rr: AtomicUsize,
}

impl RelayPool {
    /// Pool over `transport`, drawing from `endpoints`.
    pub fn new(
        cfg: RelayPoolConfig,
        transport: Arc<dyn RelayTransport>,
        endpoints: Vec<String>,
    ) -> Self {
        let pool = Self {
            cfg,
            transport,
            active: RwLock::new(Vec::new()),
            candidates: RwLock::new(endpoints),
            rr: AtomicUsize::new(0),
        };
        pool.refill();
        pool
    }

    /// Bring the active set up to `min_relays` from remaining candidates.
    fn refill(&self) {
        let (Ok(mut active), Ok(mut candidates)) =
            (self.active.write(), self.candidates.write())
        else {
            return;
        };
        while active.len() < self.cfg.min_relays && !candidates.is_empty() {
            let endpoint = candidates.remove(0);
            info!(endpoint = %endpoint, "relay activated");
            active.push(RelayInfo::new(endpoint));
        }
        active.truncate(self.cfg.max_relays);
    }

    /// Healthy relay count.
    pub fn healthy_count(&self) -> usize {
        self.active
            .read()
            .map(|g| g.iter().filter(|r| r.healthy).count())
            .unwrap_or(0)
    }

    /// Snapshot of the active set.
    pub fn relays(&self) -> Vec<RelayInfo> {
        self.active.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Pick a healthy relay per the configured strategy.
    pub fn select(&self) -> Result<String, RelayError> {
        let g = self.active.read().map_err(|_| RelayError::Unhealthy)?;
        let healthy: Vec<&RelayInfo> = g.iter().filter(|r| r.healthy).collect();
        if healthy.is_empty() {
            return Err(RelayError::Unhealthy);
        }
        let chosen = match self.cfg.strategy {
            LoadBalanceStrategy::Random => healthy
                .choose(&mut rand::thread_rng())
                .map(|r| r.endpoint.clone()),
            LoadBalanceStrategy::RoundRobin => {
                let i = self.rr.fetch_add(1, Ordering::Relaxed) % healthy.len();
                Some(healthy[i].endpoint.clone())
            }
            LoadBalanceStrategy::LatencyWeighted => {
                let weights: Vec<f64> = healthy
                    .iter()
                    .map(|r| 1.0 / (1.0 + r.latency_ms))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut roll = rand::thread_rng().gen_range(0.0..total.max(f64::MIN_POSITIVE));
                let mut pick = healthy.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    if roll < *w {
                        pick = i;
                        break;
                    }
                    roll -= w;
                }
                Some(healthy[pick].endpoint.clone())
            }
        };
        chosen.ok_or(RelayError::Unhealthy)
    }

    /// Send an envelope through a selected (or pinned) relay and record the
    /// outcome against it.
    pub async fn dispatch(
        &self,
        envelope: RelayEnvelope,
        pinned: Option<&str>,
    ) -> Result<RelayEnvelope, RelayError> {
        let endpoint = match pinned {
            Some(e) => e.to_string(),
            None => self.select()?,
        };
        let started = now_ms();
        let result = self.transport.exchange(&endpoint, envelope).await;
        let latency = now_ms().saturating_sub(started) as f64;
        self.record(&endpoint, result.is_ok(), latency);
        result
    }

    fn record(&self, endpoint: &str, ok: bool, latency_ms: f64) {
        if let Ok(mut g) = self.active.write() {
            if let Some(r) = g.iter_mut().find(|r| r.endpoint == endpoint) {
                r.record(ok, latency_ms);
            }
        }
    }

    /// Probe every active relay; mark failures unhealthy and pull in
    /// replacements.
    pub async fn health_check_all(&self, session: &SessionBox) -> usize {
        let endpoints: Vec<String> = self
            .active
            .read()
            .map(|g| g.iter().map(|r| r.endpoint.clone()).collect())
            .unwrap_or_default();
        let mut failed = 0usize;
        for endpoint in endpoints {
            let probe = RelayPayload::HealthCheck(HealthCheck {
                timestamp_ms: now_ms() as i64,
                test_block: None,
            });
            let ok = match serde_json::to_vec(&probe) {
                Ok(body) => match session.seal(&body) {
                    Ok((ciphertext, _)) => {
                        let envelope = RelayEnvelope {
                            msg_type: MessageType::HealthCheck,
                            id: format!("hc-{}-{}", endpoint, now_ms()),
                            timestamp_ms: now_ms() as i64,
                            ciphertext,
                        };
                        self.transport.exchange(&endpoint, envelope).await.is_ok()
                    }
                    Err(_) => false,
                },
                Err(_) => false,
            };
            if let Ok(mut g) = self.active.write() {
                if let Some(r) = g.iter_mut().find(|r| r.endpoint == endpoint) {
                    r.healthy = ok;
                    r.last_check_ms = now_ms();
                }
            }
            if !ok {
                failed += 1;
                warn!(endpoint = %endpoint, "relay failed health check");
            }
        }
        if failed > 0 {
            self.drop_unhealthy();
            self.refill();
        }
        failed
    }

    fn drop_unhealthy(&self) {
        if let Ok(mut g) = self.active.write() {
            g.retain(|r| {
                if !r.healthy {
                    debug!(endpoint = %r.endpoint, "relay dropped");
                }
                r.healthy
            });
        }
    }
}

/// Spawn the periodic relay health loop.
pub fn spawn_relay_health(
    pool: Arc<RelayPool>,
    session: Arc<SessionBox>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let every = pool.cfg.health_check_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let failed = pool.health_check_all(&session).await;
                    if failed > 0 {
                        debug!(failed, "relay health sweep");
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        warn!("relay health loop stopped");
    })
}
