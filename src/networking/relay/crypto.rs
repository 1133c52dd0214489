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
#![deny(missing_docs)]

//! Public-key authenticated boxing for relay messages.
//!
//! Per-peer symmetric keys derive from a static-static X25519 agreement via
//! HKDF-SHA256 under a fixed domain label; messages are ChaCha20-Poly1305
//! with a random 96-bit nonce prefixed to the ciphertext. Only the two key
//! holders can produce a valid tag, which gives sender authentication
//! without a signature on the envelope.

use ring::{
    aead::{self, LessSafeKey, UnboundKey, CHACHA20_POLY1305},
    hkdf,
    rand::{SecureRandom, SystemRandom},
};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

const HKDF_DOMAIN: &[u8] = b"NoiseFS-Relay-Box-v1";
const NONCE_LEN: usize = 12;
const KEY_FILE: &str = "relay_identity.key";

/// Relay crypto errors.
#[derive(Debug, Error)]
pub enum RelayCryptoError {
    /// Key file unreadable or unwritable.
    #[error("io")]
    Io,
    /// Key file is not 32 raw bytes.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Agreement, derivation, or AEAD failure.
    #[error("crypto")]
    Crypto,
}

/// Static X25519 identity for the relay protocol.
pub struct RelayIdentity {
    secret: StaticSecret,
    public: PublicKey,
}

impl RelayIdentity {
    /// Fresh random identity.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild from raw secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Load `data_dir/relay_identity.key`, or create and persist a new one.
    pub fn load_or_create(data_dir: impl AsRef<Path>) -> Result<Self, RelayCryptoError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir).map_err(|_| RelayCryptoError::Io)?;
        let path = dir.join(KEY_FILE);

        if path.exists() {
            let mut bytes = fs::read(&path).map_err(|_| RelayCryptoError::Io)?;
            if bytes.len() != 32 {
                bytes.zeroize();
                return Err(RelayCryptoError::InvalidKey);
            }
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&bytes);
            bytes.zeroize();
            let id = Self::from_secret_bytes(raw);
            raw.zeroize();
            return Ok(id);
        }

        let id = Self::generate();
        // Atomic-ish write: write to tmp then rename.
        let tmp = dir.join(format!("{KEY_FILE}.tmp"));
        {
            let mut f = fs::File::create(&tmp).map_err(|_| RelayCryptoError::Io)?;
            f.write_all(id.secret.as_bytes())
                .map_err(|_| RelayCryptoError::Io)?;
            f.sync_all().map_err(|_| RelayCryptoError::Io)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
        }
        fs::rename(&tmp, &path).map_err(|_| RelayCryptoError::Io)?;
        Ok(id)
    }

    /// Public half, shared with peers out of band.
    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Derive the per-peer box for `remote`.
    pub fn session(&self, remote: &[u8; 32]) -> Result<SessionBox, RelayCryptoError> {
        let remote_pk = PublicKey::from(*remote);
        let shared = self.secret.diffie_hellman(&remote_pk);

        // Salt binds both public halves in a direction-independent order so
        // each side derives the same key.
        let (lo, hi) = if self.public.as_bytes() <= remote {
            (self.public.as_bytes().as_slice(), remote.as_slice())
        } else {
            (remote.as_slice(), self.public.as_bytes().as_slice())
        };
        let mut salt_bytes = Vec::with_capacity(64);
        salt_bytes.extend_from_slice(lo);
        salt_bytes.extend_from_slice(hi);

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt_bytes);
        let prk = salt.extract(shared.as_bytes());
        let okm = prk
            .expand(&[HKDF_DOMAIN], hkdf::HKDF_SHA256)
            .map_err(|_| RelayCryptoError::Crypto)?;
        let mut key = [0u8; 32];
        okm.fill(&mut key).map_err(|_| RelayCryptoError::Crypto)?;

        let unbound =
            UnboundKey::new(&CHACHA20_POLY1305, &key).map_err(|_| RelayCryptoError::Crypto)?;
        key.zeroize();
        Ok(SessionBox {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }
}

/// Symmetric box for one peer pair.
pub struct SessionBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SessionBox {
    /// Seal a payload. Returns `nonce || ciphertext || tag` plus the nonce,
    /// which the sender retains keyed by message id to validate the reply.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), RelayCryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| RelayCryptoError::Crypto)?;
        let mut buf = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut buf,
            )
            .map_err(|_| RelayCryptoError::Crypto)?;
        let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&buf);
        Ok((out, nonce))
    }

    /// Open a sealed payload. Authentication failure drops the message.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, RelayCryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(RelayCryptoError::Crypto);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&sealed[..NONCE_LEN]);
        let mut buf = sealed[NONCE_LEN..].to_vec();
        let plain = self
            .key
            .open_in_place(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut buf,
            )
            .map_err(|_| RelayCryptoError::Crypto)?;
        Ok(plain.to_vec())
    }
}
