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

//! Node configuration root (TOML), with load-time validation.
//!
//! Every section is optional in the file; a missing section takes its
//! defaults. `validate()` is called once on load and is the only place
//! configuration rules are enforced.

use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::core::blocks::valid_block_size;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config")]
    Read,
    #[error("parse config")]
    Parse,
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Node configuration root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Node settings.
    #[serde(default)]
    pub node: NodeSettings,
    /// HTTP endpoints (metrics, health).
    #[serde(default)]
    pub http: HttpConfig,
    /// Object store selection and resilience.
    #[serde(default)]
    pub store: StoreSection,
    /// Block cache sizing.
    #[serde(default)]
    pub cache: CacheSection,
    /// Throughput and block sizing.
    #[serde(default)]
    pub performance: PerformanceSection,
    /// Encryption switches.
    #[serde(default)]
    pub security: SecuritySection,
    /// Relay pool sizing and health.
    #[serde(default)]
    pub relay: RelaySection,
    /// Cover traffic and request mixing.
    #[serde(default)]
    pub mixing: MixingSection,
    /// Randomizer reuse policy.
    #[serde(default)]
    pub reuse: ReuseSection,
    /// Inventory gossip settings.
    #[serde(default)]
    pub p2p: P2pSection,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (db + keys).
    pub data_dir: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "noisefs".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

/// HTTP config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. 0.0.0.0:9090.
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Object store section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSection {
    /// Backend name: "sled" or "memory".
    pub backend: String,
    /// Retry attempts for transient store failures.
    pub retry_attempts: u32,
    /// Per-call timeout in ms (doubled at maximum privacy level).
    pub op_timeout_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "sled".to_string(),
            retry_attempts: 3,
            op_timeout_ms: 30_000,
        }
    }
}

/// Cache section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSection {
    /// Maximum cached items.
    pub block_cache_size: usize,
    /// Total cache memory budget in MiB.
    pub memory_limit_mb: u64,
    /// Accept altruistic entries cached on behalf of the network.
    pub enable_altruistic: bool,
    /// Personal-cache floor in MiB; altruistic entries never squeeze
    /// personal usage below this.
    pub min_personal_cache_mb: u64,
    /// Run the predictive tier machinery (off = plain warm/cold LRU behavior).
    pub enable_adaptive_cache: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            block_cache_size: 4096,
            memory_limit_mb: 512,
            enable_altruistic: true,
            min_personal_cache_mb: 256,
            enable_adaptive_cache: true,
        }
    }
}

/// Performance section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerformanceSection {
    /// Block size in bytes; power of two, >= 1024.
    pub block_size: usize,
    /// Advisory concurrency bound, 1..=100.
    pub max_concurrent_ops: usize,
    /// Prefetch subsequent descriptor entries on download.
    pub read_ahead: bool,
    /// Defer store writes behind the cache.
    pub write_back: bool,
    /// Streaming buffer size in bytes.
    pub stream_buffer_size: usize,
    /// Sample process memory in the metrics loop.
    pub enable_memory_monitoring: bool,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            block_size: 128 * 1024,
            max_concurrent_ops: 16,
            read_ahead: false,
            write_back: false,
            stream_buffer_size: 64 * 1024,
            enable_memory_monitoring: false,
        }
    }
}

/// Security section. `enable_encryption` is the master switch; when false,
/// every other flag here must also be false.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecuritySection {
    /// Master encryption switch.
    pub enable_encryption: bool,
    /// Encrypt descriptors at rest.
    pub encrypt_descriptors: bool,
    /// Encrypt uploads unless the caller opts out.
    pub default_encrypted: bool,
    /// Require a passphrase for descriptor keys.
    pub require_password: bool,
    /// Prompt interactively for the passphrase.
    pub password_prompt: bool,
    /// Encrypt the local index.
    pub encrypt_local_index: bool,
    /// Zeroize key material aggressively.
    pub secure_memory: bool,
    /// Scrub temporary buffers after use.
    pub anti_forensics: bool,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            enable_encryption: true,
            encrypt_descriptors: true,
            default_encrypted: false,
            require_password: false,
            password_prompt: false,
            encrypt_local_index: false,
            secure_memory: true,
            anti_forensics: false,
        }
    }
}

/// Relay section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelaySection {
    /// Upper bound on pool size.
    pub max_relays: usize,
    /// Pool is brought to this size at startup.
    pub min_relays: usize,
    /// Health probe period in ms.
    pub health_check_interval_ms: u64,
    /// Drop relays unseen for this long, in ms.
    pub max_relay_age_ms: u64,
    /// "random", "round_robin" or "latency_weighted".
    pub load_balance_strategy: String,
    /// Number of relay hops (single-hop exercised; multi-hop is a path hint).
    pub privacy_level: u8,
    /// Static relay endpoints to draw the pool from.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            max_relays: 8,
            min_relays: 2,
            health_check_interval_ms: 30_000,
            max_relay_age_ms: 3_600_000,
            load_balance_strategy: "latency_weighted".to_string(),
            privacy_level: 1,
            endpoints: Vec::new(),
        }
    }
}

/// Mixing section (cover traffic + request mixer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixingSection {
    /// Target cover/(cover+real) ratio over the sliding window.
    pub noise_ratio: f64,
    /// Minimum cover requests per interval.
    pub min_cover_requests: usize,
    /// Maximum cover requests per interval.
    pub max_cover_requests: usize,
    /// Cover emission period in ms.
    pub cover_interval_ms: u64,
    /// Per-cover-request jitter upper bound in ms.
    pub random_delay_ms: u64,
    /// Cover bandwidth ceiling in bytes/sec.
    pub bandwidth_limit: u64,
    /// Minimum hold time for any request, in ms (timing anonymity).
    pub mixing_delay_ms: u64,
    /// Batch floor.
    pub min_mix_size: usize,
    /// Batch ceiling.
    pub max_mix_size: usize,
    /// Decoys interleaved per batch, as a fraction of batch size.
    pub cover_ratio: f64,
    /// Per-request dispatch jitter upper bound in ms.
    pub temporal_jitter_ms: u64,
    /// Max wait before dispatching an under-filled batch, in ms.
    pub batch_timeout_ms: u64,
    /// Bounded queue capacity; submissions beyond it are rejected busy.
    pub max_concurrent: usize,
}

impl Default for MixingSection {
    fn default() -> Self {
        Self {
            noise_ratio: 0.3,
            min_cover_requests: 1,
            max_cover_requests: 5,
            cover_interval_ms: 10_000,
            random_delay_ms: 2_000,
            bandwidth_limit: 1_048_576,
            mixing_delay_ms: 100,
            min_mix_size: 4,
            max_mix_size: 16,
            cover_ratio: 0.25,
            temporal_jitter_ms: 250,
            batch_timeout_ms: 500,
            max_concurrent: 64,
        }
    }
}

/// Reuse section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReuseSection {
    /// Minimum fraction of plaintext blocks mixed with public-domain content.
    pub public_domain_ratio: f64,
    /// Reuse count at which a pool block counts as reused for policy.
    pub min_reuse_count: u64,
    /// Pool entry cap.
    pub pool_max_size: usize,
    /// Blocks minted at first initialization when the store holds no pool.
    pub seed_blocks: usize,
    /// Optional TOML file listing curated public-domain addresses.
    #[serde(default)]
    pub corpus_path: Option<String>,
}

impl Default for ReuseSection {
    fn default() -> Self {
        Self {
            public_domain_ratio: 0.3,
            min_reuse_count: 2,
            pool_max_size: 4096,
            seed_blocks: 64,
            corpus_path: None,
        }
    }
}

/// Inventory gossip section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2pSection {
    /// Listen multiaddr.
    pub listen_addr: String,
    /// Gossipsub topic for block-inventory announcements.
    pub inventory_topic: String,
    /// Max messages/sec per peer (best-effort).
    pub max_msg_per_sec: u32,
    /// Max peers allowed from the same IP (best-effort).
    pub max_peers_per_ip: usize,
    /// Bootstrap peers to dial at startup.
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl Default for P2pSection {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/4100".to_string(),
            inventory_topic: "noisefs-inventory".to_string(),
            max_msg_per_sec: 200,
            max_peers_per_ip: 4,
            bootstrap: Vec::new(),
        }
    }
}

impl NoiseConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
        let cfg: NoiseConfig = toml::from_str(&text).map_err(|_| ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforce the cross-field rules. Called on every load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !valid_block_size(self.performance.block_size) {
            return Err(ConfigError::Invalid(
                "performance.block_size must be a power of two >= 1024".to_string(),
            ));
        }
        if self.performance.max_concurrent_ops == 0 || self.performance.max_concurrent_ops > 100 {
            return Err(ConfigError::Invalid(
                "performance.max_concurrent_ops must be in 1..=100".to_string(),
            ));
        }
        if self.performance.stream_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "performance.stream_buffer_size must be positive".to_string(),
            ));
        }
        if self.cache.memory_limit_mb == 0 || self.cache.block_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "cache sizes must be positive".to_string(),
            ));
        }
        if self.cache.min_personal_cache_mb > self.cache.memory_limit_mb {
            return Err(ConfigError::Invalid(
                "cache.min_personal_cache_mb must not exceed cache.memory_limit_mb".to_string(),
            ));
        }
        if !self.security.enable_encryption {
            let s = &self.security;
            if s.encrypt_descriptors
                || s.default_encrypted
                || s.require_password
                || s.password_prompt
                || s.encrypt_local_index
            {
                return Err(ConfigError::Invalid(
                    "security.enable_encryption=false forbids all other encryption flags"
                        .to_string(),
                ));
            }
        }
        if self.relay.min_relays > self.relay.max_relays {
            return Err(ConfigError::Invalid(
                "relay.min_relays must not exceed relay.max_relays".to_string(),
            ));
        }
        match self.relay.load_balance_strategy.as_str() {
            "random" | "round_robin" | "latency_weighted" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "relay.load_balance_strategy unknown: {other}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.mixing.noise_ratio) {
            return Err(ConfigError::Invalid(
                "mixing.noise_ratio must be in [0,1)".to_string(),
            ));
        }
        if self.mixing.min_cover_requests > self.mixing.max_cover_requests {
            return Err(ConfigError::Invalid(
                "mixing.min_cover_requests must not exceed max_cover_requests".to_string(),
            ));
        }
        if self.mixing.min_mix_size == 0 || self.mixing.min_mix_size > self.mixing.max_mix_size {
            return Err(ConfigError::Invalid(
                "mixing.min_mix_size must be in 1..=max_mix_size".to_string(),
            ));
        }
        if self.mixing.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "mixing.max_concurrent must be positive".to_string(),
            ));
        }
        if self.mixing.cover_interval_ms == 0 || self.mixing.batch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "mixing intervals must be positive".to_string(),
            ));
        }
        if self.relay.health_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "relay.health_check_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reuse.public_domain_ratio) {
            return Err(ConfigError::Invalid(
                "reuse.public_domain_ratio must be in [0,1]".to_string(),
            ));
        }
        if self.reuse.pool_max_size == 0 {
            return Err(ConfigError::Invalid(
                "reuse.pool_max_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-call store timeout; doubled when privacy level is maximum.
    pub fn store_timeout_ms(&self) -> u64 {
        if self.relay.privacy_level >= 3 {
            self.store.op_timeout_ms * 2
        } else {
            self.store.op_timeout_ms
        }
    }
}
