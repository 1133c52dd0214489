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

//! Descriptor persistence above the object store, with optional AEAD
//! encryption at rest.
//!
//! ## Encrypted form
//! `NONCE(12) || CIPHERTEXT+TAG(..)` where the ciphertext is
//! ChaCha20-Poly1305 over the canonical descriptor bytes. Keys are either
//! raw 32 bytes or derived from a passphrase with PBKDF2-HMAC-SHA256.

use ring::{
    aead::{self, BoundKey},
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

use super::descriptor::{Descriptor, DescriptorError};
use crate::core::blocks::Block;
use crate::core::store::{BlockStore, StoreError};
use crate::core::types::{BlockAddress, BlockId};

const NONCE_LEN: usize = 12;

// PBKDF2 baseline matching server-side passphrase hardening.
const PBKDF2_ITERS: u32 = 100_000;

/// Descriptor store errors.
#[derive(Debug, Error)]
pub enum DescriptorStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("crypto")]
    Crypto,
    /// Stored bytes are encrypted but no key is configured.
    #[error("missing descriptor key")]
    MissingKey,
}

struct OneNonce(Option<aead::Nonce>);

impl aead::NonceSequence for OneNonce {
    fn advance(&mut self) -> Result<aead::Nonce, ring::error::Unspecified> {
        self.0.take().ok_or(ring::error::Unspecified)
    }
}

/// Descriptor encryption key.
pub struct DescriptorCrypto {
    key: [u8; 32],
    rng: SystemRandom,
}

impl DescriptorCrypto {
    /// Use a raw 32-byte key.
    pub fn from_key_bytes(key: [u8; 32]) -> Self {
        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    /// Derive a key from a passphrase and salt.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; 32];
        let iters = NonZeroU32::new(PBKDF2_ITERS).expect("nonzero");
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iters,
            salt,
            passphrase.as_bytes(),
            &mut key,
        );
        Self::from_key_bytes(key)
    }

    fn sealing_key(&self, nonce: [u8; NONCE_LEN]) -> Result<aead::SealingKey<OneNonce>, DescriptorStoreError> {
        let unbound = aead::UnboundKey::new(&aead::CHACHA20_POLY1305, &self.key)
            .map_err(|_| DescriptorStoreError::Crypto)?;
        Ok(aead::SealingKey::new(
            unbound,
            OneNonce(Some(aead::Nonce::assume_unique_for_key(nonce))),
        ))
    }

    fn opening_key(&self, nonce: [u8; NONCE_LEN]) -> Result<aead::OpeningKey<OneNonce>, DescriptorStoreError> {
        let unbound = aead::UnboundKey::new(&aead::CHACHA20_POLY1305, &self.key)
            .map_err(|_| DescriptorStoreError::Crypto)?;
        Ok(aead::OpeningKey::new(
            unbound,
            OneNonce(Some(aead::Nonce::assume_unique_for_key(nonce))),
        ))
    }

    /// Seal plaintext: random nonce prefixed to ciphertext+tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, DescriptorStoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| DescriptorStoreError::Crypto)?;
        let mut key = self.sealing_key(nonce)?;
        let mut buf = plaintext.to_vec();
        key.seal_in_place_append_tag(aead::Aad::empty(), &mut buf)
            .map_err(|_| DescriptorStoreError::Crypto)?;
        let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&buf);
        Ok(out)
    }

    /// Open sealed bytes. Authentication failure is a crypto error, never a
    /// parse error.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, DescriptorStoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(DescriptorStoreError::Crypto);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&sealed[..NONCE_LEN]);
        let mut key = self.opening_key(nonce)?;
        let mut buf = sealed[NONCE_LEN..].to_vec();
        let plain = key
            .open_in_place(aead::Aad::empty(), &mut buf)
            .map_err(|_| DescriptorStoreError::Crypto)?;
        Ok(plain.to_vec())
    }
}

impl Drop for DescriptorCrypto {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Stateless descriptor persistence above a block store.
pub struct DescriptorStore {
    store: Arc<dyn BlockStore>,
    crypto: Option<DescriptorCrypto>,
}

impl DescriptorStore {
    /// Plain store; descriptors are written unencrypted.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            crypto: None,
        }
    }

    /// Encrypting store.
    pub fn with_crypto(store: Arc<dyn BlockStore>, crypto: DescriptorCrypto) -> Self {
        Self {
            store,
            crypto: Some(crypto),
        }
    }

    /// Whether descriptors are encrypted at rest.
    pub fn encrypts(&self) -> bool {
        self.crypto.is_some()
    }

    /// Serialize (and possibly seal) the descriptor, store it, and return
    /// its content id.
    pub async fn save(&self, descriptor: &Descriptor) -> Result<BlockId, DescriptorStoreError> {
        descriptor.validate()?;
        let plain = descriptor.encode();
        let bytes = match &self.crypto {
            Some(c) => c.seal(&plain)?,
            None => plain,
        };
        let addr = self.store.put(&Block::from_bytes(bytes)).await?;
        Ok(addr.id)
    }

    /// Fetch, (possibly) open, parse and validate a descriptor.
    pub async fn load(&self, id: &BlockId) -> Result<Descriptor, DescriptorStoreError> {
        let addr = BlockAddress::for_id(self.store.backend(), *id);
        let block = self.store.get(&addr).await?;
        let bytes = block.into_bytes();
        let plain = match &self.crypto {
            Some(c) => c.open(&bytes)?,
            None => bytes,
        };
        Ok(Descriptor::decode(&plain)?)
    }
}
