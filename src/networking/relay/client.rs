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

//! Client side of the relay protocol: boxes requests, correlates replies by
//! message id, and tracks the achieved noise ratio.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{trace, warn};

use super::crypto::{RelayIdentity, SessionBox};
use super::pool::{RelayError, RelayPool};
use super::protocol::{BlockRequest, RelayEnvelope, RelayPayload, RequestOptions};
use crate::core::blocks::{content_hash, Block};
use crate::core::types::{now_ms, BlockId};

/// Sliding real/cover request window; the achieved noise ratio is
/// cover / (cover + real) over it.
pub struct NoiseWindow {
    window: Duration,
    samples: Mutex<VecDeque<(u64, bool)>>,
}

impl NoiseWindow {
    /// Window of `window` length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one dispatched request.
    pub fn record(&self, is_cover: bool) {
        let now = now_ms();
        let cutoff = now.saturating_sub(self.window.as_millis() as u64);
        if let Ok(mut g) = self.samples.lock() {
            g.push_back((now, is_cover));
            while g.front().is_some_and(|&(t, _)| t < cutoff) {
                g.pop_front();
            }
        }
    }

    /// (real, cover) counts inside the window.
    pub fn counts(&self) -> (u64, u64) {
        let cutoff = now_ms().saturating_sub(self.window.as_millis() as u64);
        let Ok(g) = self.samples.lock() else {
            return (0, 0);
        };
        let mut real = 0u64;
        let mut cover = 0u64;
        for &(t, is_cover) in g.iter() {
            if t < cutoff {
                continue;
            }
            if is_cover {
                cover += 1;
            } else {
                real += 1;
            }
        }
        (real, cover)
    }

    /// Achieved noise ratio; 0 when idle.
    pub fn ratio(&self) -> f64 {
        let (real, cover) = self.counts();
        let total = real + cover;
        if total == 0 {
            0.0
        } else {
            cover as f64 / total as f64
        }
    }
}

struct Pending {
    nonce: [u8; 12],
    sent_ms: u64,
}

/// Relay protocol client.
pub struct RelayClient {
    session: SessionBox,
    pool: Arc<RelayPool>,
    pending: Mutex<HashMap<String, Pending>>,
    window: NoiseWindow,
    seq: AtomicU64,
    hops: u8,
}

impl RelayClient {
    /// Client boxing against `relay_public` through `pool`.
    pub fn new(
        identity: &RelayIdentity,
        relay_public: &[u8; 32],
        pool: Arc<RelayPool>,
        noise_window: Duration,
        hops: u8,
    ) -> Result<Self, RelayError> {
        let session = identity
            .session(relay_public)
            .map_err(|_| RelayError::Crypto)?;
        Ok(Self {
            session,
            pool,
            pending: Mutex::new(HashMap::new()),
            window: NoiseWindow::new(noise_window),
            seq: AtomicU64::new(0),
            hops,
        })
    }

    /// The shared pool.
    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    /// Real/cover accounting window.
    pub fn noise_window(&self) -> &NoiseWindow {
        &self.window
    }

    /// A second session for the health loop.
    pub fn health_session(
        identity: &RelayIdentity,
        relay_public: &[u8; 32],
    ) -> Result<SessionBox, RelayError> {
        identity
            .session(relay_public)
            .map_err(|_| RelayError::Crypto)
    }

    fn next_id(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("req-{n}-{}", now_ms())
    }

    /// Fetch one block through the relay pool. `Ok(None)` means the relay
    /// answered but does not hold the block.
    pub async fn request_block(
        &self,
        id: &BlockId,
        priority: u8,
        is_decoy: bool,
    ) -> Result<Option<Block>, RelayError> {
        let request = RelayPayload::BlockRequest(BlockRequest {
            block_id: id.to_base58(),
            // Single hop today; additional hops would be listed here.
            relay_path: Vec::with_capacity(self.hops.saturating_sub(1) as usize),
            options: RequestOptions::default(),
            peer_hint: None,
            priority,
            is_decoy,
        });
        let body = serde_json::to_vec(&request).map_err(|_| RelayError::Crypto)?;
        let (ciphertext, nonce) = self.session.seal(&body).map_err(|_| RelayError::Crypto)?;
        let msg_id = self.next_id();
        if let Ok(mut g) = self.pending.lock() {
            g.insert(
                msg_id.clone(),
                Pending {
                    nonce,
                    sent_ms: now_ms(),
                },
            );
        }

        let envelope = RelayEnvelope {
            msg_type: request.message_type(),
            id: msg_id.clone(),
            timestamp_ms: now_ms() as i64,
            ciphertext,
        };
        let reply = self.pool.dispatch(envelope, None).await;
        self.window.record(is_decoy);

        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                let _ = self.forget(&msg_id);
                return Err(e);
            }
        };

        // Replies must echo a message id we actually sent.
        let Some(pending) = self.forget(&reply.id) else {
            warn!(id = %reply.id, "unsolicited relay reply dropped");
            return Err(RelayError::Crypto);
        };
        trace!(
            id = %reply.id,
            nonce = %hex::encode(pending.nonce),
            rtt_ms = now_ms().saturating_sub(pending.sent_ms),
            "relay reply correlated"
        );

        let plain = self
            .session
            .open(&reply.ciphertext)
            .map_err(|_| RelayError::Crypto)?;
        let payload: RelayPayload =
            serde_json::from_slice(&plain).map_err(|_| RelayError::Crypto)?;
        let response = match payload {
            RelayPayload::BlockResponse(r) => r,
            RelayPayload::Error(e) => return Err(RelayError::Remote(e.message)),
            _ => return Err(RelayError::Crypto),
        };
        if !response.success {
            return Ok(None);
        }
        let Some(data_hex) = response.data else {
            return Ok(None);
        };
        let bytes = hex::decode(data_hex).map_err(|_| RelayError::Crypto)?;
        // Decoys are discarded unverified; real payloads must hash to the
        // requested id.
        if !is_decoy && content_hash(&bytes) != *id {
            return Err(RelayError::Crypto);
        }
        Ok(Some(Block::from_bytes(bytes)))
    }

    fn forget(&self, msg_id: &str) -> Option<Pending> {
        self.pending.lock().ok()?.remove(msg_id)
    }

    /// Drop pending-reply records older than `max_age`.
    pub fn expire_pending(&self, max_age: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(max_age.as_millis() as u64);
        let Ok(mut g) = self.pending.lock() else {
            return 0;
        };
        let before = g.len();
        g.retain(|_, p| p.sent_ms >= cutoff);
        before - g.len()
    }
}
