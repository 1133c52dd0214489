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

//! Deterministic core types and canonical encoding helpers.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering (use BTreeMap/BTreeSet).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    // Fast-path cap on the raw wire payload.
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Defensive cap inside the deserializer to prevent memory/CPU bombs via large container lengths.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Content hash of a stored block (SHA-256, 32 bytes).
///
/// Equality of two `BlockId`s implies equality of the underlying bytes for
/// every purpose in this system.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId([u8; 32]);

impl BlockId {
    /// Construct from raw digest bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }
    /// Return digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    /// Render as base58 (the external content-id string form).
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
    /// Parse the external base58 content-id string form.
    pub fn from_base58(s: &str) -> Option<Self> {
        let mut out = [0u8; 32];
        let n = bs58::decode(s).onto(&mut out).ok()?;
        if n != 32 {
            return None;
        }
        Some(Self(out))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to correlate log lines.
        let b58 = self.to_base58();
        write!(f, "BlockId({})", &b58[..b58.len().min(12)])
    }
}

/// Closed set of object-store backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreBackend {
    /// In-process map, used by tests and tools.
    Memory,
    /// Durable sled-backed store.
    Sled,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::Sled => f.write_str("sled"),
        }
    }
}

/// Canonical map type alias.
pub type CanonicalMap<K, V> = BTreeMap<K, V>;

/// Address of a stored block. Returned by every store operation and supplied
/// to every retrieval. Equality and hashing are by `(backend, id)` only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockAddress {
    /// Content hash of the block.
    pub id: BlockId,
    /// Backend that holds the block.
    pub backend: StoreBackend,
    /// Stored size in bytes.
    pub size: u64,
    /// Digest recomputed by the backend at write time.
    pub checksum: BlockId,
    /// Wall-clock store time in ms since UNIX epoch.
    pub created_at_ms: u64,
    /// Free-form backend metadata.
    #[serde(default)]
    pub metadata: CanonicalMap<String, String>,
}

impl BlockAddress {
    /// Minimal address for a known content id (descriptor entries carry ids only).
    pub fn for_id(backend: StoreBackend, id: BlockId) -> Self {
        Self {
            id,
            backend,
            size: 0,
            checksum: id,
            created_at_ms: 0,
            metadata: CanonicalMap::new(),
        }
    }
}

impl PartialEq for BlockAddress {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend && self.id == other.id
    }
}
impl Eq for BlockAddress {}

impl std::hash::Hash for BlockAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.backend.hash(state);
        self.id.hash(state);
    }
}

/// Wall clock in ms since UNIX epoch (0 if the clock is unavailable).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cancellation signal handed to every externally-visible operation.
///
/// Cloneable; `triggered` flips once and never resets. Mid-upload
/// cancellation leaves already-stored blocks in place and never writes the
/// descriptor.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Owning side of a [`CancelSignal`].
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle plus its signal.
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    /// Trigger cancellation for all signal clones.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    /// A signal that never fires, for call sites without a caller-side handle.
    pub fn never() -> Self {
        // Dropping the sender freezes the watched value at `false`.
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
