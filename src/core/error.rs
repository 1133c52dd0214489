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

//! Crate-level error taxonomy.
//!
//! Module-local errors (store, codec, pool, mixer, ...) convert into these
//! kinds at the client/coordinator boundary. User-visible messages never
//! expose internal block ids.

use thiserror::Error;

/// Error kinds surfaced by upload/download operations.
#[derive(Debug, Error)]
pub enum NoiseError {
    /// Object store unreachable after retries.
    #[error("store unavailable")]
    StoreUnavailable,
    /// Address absent from the store.
    #[error("not found")]
    NotFound,
    /// Checksum mismatch on retrieval. Fatal for that address.
    #[error("integrity failure")]
    IntegrityFailure,
    /// Pool cannot supply enough distinct randomizers of the required size.
    #[error("insufficient randomizers")]
    InsufficientRandomizers,
    /// Mixer queue full.
    #[error("mixer busy")]
    MixerBusy,
    /// No healthy relay in the pool.
    #[error("relay unhealthy")]
    RelayUnhealthy,
    /// Bad configuration, malformed descriptor, or incompatible filter merge.
    #[error("validation: {0}")]
    Validation(String),
    /// Decryption or authentication failure.
    #[error("crypto failure")]
    CryptoFailure,
    /// Caller-issued cancellation.
    #[error("cancelled")]
    Cancelled,
}

impl NoiseError {
    /// Stable kind label for logs, audits, and user-facing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            NoiseError::StoreUnavailable => "store_unavailable",
            NoiseError::NotFound => "not_found",
            NoiseError::IntegrityFailure => "integrity_failure",
            NoiseError::InsufficientRandomizers => "insufficient_randomizers",
            NoiseError::MixerBusy => "mixer_busy",
            NoiseError::RelayUnhealthy => "relay_unhealthy",
            NoiseError::Validation(_) => "validation_error",
            NoiseError::CryptoFailure => "crypto_failure",
            NoiseError::Cancelled => "cancelled",
        }
    }
}

impl From<crate::core::types::CodecError> for NoiseError {
    fn from(e: crate::core::types::CodecError) -> Self {
        NoiseError::Validation(e.to_string())
    }
}
