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

//! Relay message envelope and typed payloads.
//!
//! Wire format, big-endian:
//!
//! ```text
//! u8  version
//! u8  type
//! u16 id_len        utf8 id
//! i64 timestamp_millis
//! u32 ct_len        ciphertext
//! ```
//!
//! The ciphertext is the session box over the JSON payload. Replay
//! protection: a per-sender LRU of recently-seen ids plus a five-minute
//! timestamp window.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use thiserror::Error;

/// Current wire version.
pub const RELAY_PROTO_VERSION: u8 = 1;
/// Messages older than this are rejected.
pub const REPLAY_WINDOW_MS: i64 = 5 * 60 * 1000;

const MAX_ID_LEN: usize = 128;
const MAX_CIPHERTEXT_LEN: usize = 8 * 1024 * 1024;
const REPLAY_IDS_PER_SENDER: usize = 1024;

/// Envelope errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("truncated")]
    Truncated,
    #[error("unsupported version")]
    Version,
    #[error("unknown type")]
    Type,
    #[error("bad id")]
    Id,
    #[error("oversized")]
    Oversized,
    #[error("trailing bytes")]
    Trailing,
}

/// Replay verdicts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    /// Id already accepted inside the window.
    #[error("replayed")]
    Replayed,
    /// Timestamp outside the window.
    #[error("stale")]
    Stale,
}

/// Message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Block fetch.
    BlockRequest,
    /// Block fetch reply.
    BlockResponse,
    /// Decoy batch announcement.
    CoverRequest,
    /// Liveness probe.
    HealthCheck,
    /// Error reply.
    Error,
}

impl MessageType {
    fn to_u8(self) -> u8 {
        match self {
            MessageType::BlockRequest => 0,
            MessageType::BlockResponse => 1,
            MessageType::CoverRequest => 2,
            MessageType::HealthCheck => 3,
            MessageType::Error => 4,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::BlockRequest),
            1 => Some(MessageType::BlockResponse),
            2 => Some(MessageType::CoverRequest),
            3 => Some(MessageType::HealthCheck),
            4 => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// Authenticated message envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayEnvelope {
    /// Payload type.
    pub msg_type: MessageType,
    /// Sender-unique message id; replies echo it.
    pub id: String,
    /// Sender wall clock, ms since UNIX epoch.
    pub timestamp_ms: i64,
    /// Boxed JSON payload.
    pub ciphertext: Vec<u8>,
}

impl RelayEnvelope {
    /// Serialize to the stable wire format.
    pub fn encode(&self) -> Vec<u8> {
        let id = self.id.as_bytes();
        let mut out = Vec::with_capacity(16 + id.len() + self.ciphertext.len());
        out.push(RELAY_PROTO_VERSION);
        out.push(self.msg_type.to_u8());
        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the stable wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        fn take<'a>(
            bytes: &'a [u8],
            pos: &mut usize,
            n: usize,
        ) -> Result<&'a [u8], EnvelopeError> {
            let end = pos.checked_add(n).ok_or(EnvelopeError::Truncated)?;
            if end > bytes.len() {
                return Err(EnvelopeError::Truncated);
            }
            let s = &bytes[*pos..end];
            *pos = end;
            Ok(s)
        }

        let mut pos = 0usize;
        let version = take(bytes, &mut pos, 1)?[0];
        if version != RELAY_PROTO_VERSION {
            return Err(EnvelopeError::Version);
        }
        let msg_type = MessageType::from_u8(take(bytes, &mut pos, 1)?[0]).ok_or(EnvelopeError::Type)?;
        let id_len = {
            let b = take(bytes, &mut pos, 2)?;
            u16::from_be_bytes([b[0], b[1]]) as usize
        };
        if id_len == 0 || id_len > MAX_ID_LEN {
            return Err(EnvelopeError::Id);
        }
        let id = std::str::from_utf8(take(bytes, &mut pos, id_len)?)
            .map_err(|_| EnvelopeError::Id)?
            .to_string();
        let timestamp_ms = {
            let b = take(bytes, &mut pos, 8)?;
            let mut a = [0u8; 8];
            a.copy_from_slice(b);
            i64::from_be_bytes(a)
        };
        let ct_len = {
            let b = take(bytes, &mut pos, 4)?;
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        if ct_len > MAX_CIPHERTEXT_LEN {
            return Err(EnvelopeError::Oversized);
        }
        let ciphertext = take(bytes, &mut pos, ct_len)?.to_vec();
        if pos != bytes.len() {
            return Err(EnvelopeError::Trailing);
        }
        Ok(Self {
            msg_type,
            id,
            timestamp_ms,
            ciphertext,
        })
    }
}

/// Per-request knobs carried inside a block request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOptions {
    /// Requester-side deadline in ms.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Skip caches on the serving side.
    #[serde(default)]
    pub no_cache: bool,
}

/// Block fetch payload. `relay_path` is the multi-hop hook; current call
/// sites exercise single-hop.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRequest {
    /// Base58 content id.
    pub block_id: String,
    /// Onward hops, outermost first.
    #[serde(default)]
    pub relay_path: Vec<String>,
    /// Request knobs.
    #[serde(default)]
    pub options: RequestOptions,
    /// Suggested holder.
    #[serde(default)]
    pub peer_hint: Option<String>,
    /// Batch ordering priority (higher first).
    #[serde(default)]
    pub priority: u8,
    /// Whether this request is cover traffic.
    #[serde(default)]
    pub is_decoy: bool,
}

/// Block fetch reply payload. Data is hex-encoded block bytes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockResponse {
    /// Echoed content id.
    pub block_id: String,
    /// Hex-encoded block bytes when found.
    #[serde(default)]
    pub data: Option<String>,
    /// Whether the fetch succeeded.
    pub success: bool,
    /// Failure label when not.
    #[serde(default)]
    pub err: Option<String>,
    /// Serving-side latency in ms.
    #[serde(default)]
    pub latency_ms: u64,
    /// Responding relay.
    pub relay_id: String,
    /// Serving-side wall clock.
    pub timestamp_ms: i64,
}

/// Cover traffic payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverRequest {
    /// Popular blocks to fan out over.
    pub popular_blocks: Vec<String>,
    /// Requests to emit.
    pub count: u32,
    /// Spread over this many ms.
    pub delay_ms: u64,
}

/// Liveness probe payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    /// Prober wall clock.
    pub timestamp_ms: i64,
    /// Optional block the relay should prove it can serve.
    #[serde(default)]
    pub test_block: Option<String>,
}

/// Error payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Stable numeric code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Optional detail.
    #[serde(default)]
    pub details: Option<String>,
}

/// Typed payload union, serialized as tagged JSON inside the box.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayPayload {
    /// Block fetch.
    BlockRequest(BlockRequest),
    /// Block fetch reply.
    BlockResponse(BlockResponse),
    /// Decoy batch.
    CoverRequest(CoverRequest),
    /// Liveness probe.
    HealthCheck(HealthCheck),
    /// Error reply.
    Error(ErrorPayload),
}

impl RelayPayload {
    /// The envelope type tag matching this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            RelayPayload::BlockRequest(_) => MessageType::BlockRequest,
            RelayPayload::BlockResponse(_) => MessageType::BlockResponse,
            RelayPayload::CoverRequest(_) => MessageType::CoverRequest,
            RelayPayload::HealthCheck(_) => MessageType::HealthCheck,
            RelayPayload::Error(_) => MessageType::Error,
        }
    }
}

/// Per-sender replay window.
pub struct ReplayGuard {
    seen: Mutex<HashMap<Vec<u8>, LruCache<String, ()>>>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayGuard {
    /// Empty guard.
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Accept or reject a message id from `sender` carrying `timestamp_ms`,
    /// judged against `now_ms`. Accepted ids are remembered.
    pub fn check(
        &self,
        sender: &[u8],
        id: &str,
        timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<(), ReplayError> {
        if now_ms.saturating_sub(timestamp_ms) > REPLAY_WINDOW_MS {
            return Err(ReplayError::Stale);
        }
        let mut g = match self.seen.lock() {
            Ok(g) => g,
            // Poisoned guard fails closed.
            Err(_) => return Err(ReplayError::Replayed),
        };
        let cache = g.entry(sender.to_vec()).or_insert_with(|| {
            LruCache::new(NonZeroUsize::new(REPLAY_IDS_PER_SENDER).expect("nonzero"))
        });
        if cache.contains(id) {
            return Err(ReplayError::Replayed);
        }
        cache.put(id.to_string(), ());
        Ok(())
    }
}
