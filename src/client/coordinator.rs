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

//! System coordinator: wires cache, pool, enforcer, popularity, peers,
//! relays, cover traffic and mixer into one upload/download surface, emits
//! compliance events, and computes the composite privacy score.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::core::cache::{
    spawn_cache_maintenance, AdaptiveCache, AdaptiveCacheConfig, AltruisticCache, AltruisticConfig,
};
use crate::core::config::NoiseConfig;
use crate::core::descriptors::{
    Descriptor, DescriptorCrypto, DescriptorStore, ReuseProof,
};
use crate::core::error::NoiseError;
use crate::core::pool::{
    spawn_popularity_refresh, PoolConfig, PopularityConfig, PopularityTracker, ReuseEnforcer,
    ReusePolicy, UniversalPool,
};
use crate::core::store::{BlockStore, CachedStore, ResilientStore, RetryPolicy};
use crate::core::types::{BlockId, CancelSignal, CanonicalMap};
use crate::monitoring::audit::{AuditEvent, AuditSink};
use crate::monitoring::metrics::Metrics;
use crate::networking::cover::{
    spawn_cover_traffic, CoverConfig, CoverTrafficGenerator,
};
use crate::networking::mixer::{MixerConfig, RequestMixer};
use crate::networking::p2p::{InventoryAnnounce, P2pEvent};
use crate::networking::peers::{spawn_peer_maintenance, PeerManager, PeerManagerConfig};
use crate::networking::relay::{
    spawn_relay_health, LoadBalanceStrategy, RelayClient, RelayIdentity, RelayPool,
    RelayPoolConfig, StoreRelayTransport,
};
use crate::client::pipeline::AnonymizationClient;

/// Outcome of a coordinated upload.
#[derive(Clone, Debug)]
pub struct UploadReceipt {
    /// Content id of the stored descriptor.
    pub descriptor_id: BlockId,
    /// Composite privacy score in [0,1]; reported, never gating.
    pub privacy_score: f64,
    /// Blocks the file split into.
    pub blocks: u32,
}

/// The coordinator. Owns every subsystem and their background tasks.
pub struct Coordinator {
    cfg: NoiseConfig,
    client: AnonymizationClient,
    cache: Arc<AltruisticCache>,
    pool: Arc<UniversalPool>,
    popularity: Arc<PopularityTracker>,
    peers: Arc<PeerManager>,
    relay_pool: Arc<RelayPool>,
    cover: Arc<CoverTrafficGenerator>,
    metrics: Arc<Metrics>,
    audit: Arc<dyn AuditSink>,
    shutdown_tx: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

fn descriptor_crypto(cfg: &NoiseConfig) -> Result<Option<DescriptorCrypto>, NoiseError> {
    if !(cfg.security.enable_encryption && cfg.security.encrypt_descriptors) {
        return Ok(None);
    }
    let passphrase = std::env::var("NOISEFS_KEY_PASSPHRASE")
        .ok()
        .filter(|v| !v.trim().is_empty());
    match passphrase {
        Some(p) => Ok(Some(DescriptorCrypto::from_passphrase(
            &p,
            cfg.node.name.as_bytes(),
        ))),
        None if cfg.security.require_password => Err(NoiseError::Validation(
            "descriptor passphrase required (set NOISEFS_KEY_PASSPHRASE)".to_string(),
        )),
        None => {
            // Fall back to a per-node persisted key.
            let dir = std::path::Path::new(&cfg.node.data_dir);
            let path = dir.join("descriptor.key");
            if let Ok(bytes) = std::fs::read(&path) {
                if bytes.len() == 32 {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&bytes);
                    return Ok(Some(DescriptorCrypto::from_key_bytes(key)));
                }
                return Err(NoiseError::Validation("bad descriptor.key".to_string()));
            }
            let mut key = [0u8; 32];
            use rand::RngCore;
            rand::rngs::OsRng.fill_bytes(&mut key);
            std::fs::create_dir_all(dir).map_err(|_| NoiseError::StoreUnavailable)?;
            std::fs::write(&path, key).map_err(|_| NoiseError::StoreUnavailable)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
            }
            Ok(Some(DescriptorCrypto::from_key_bytes(key)))
        }
    }
}

impl Coordinator {
    /// Wire every subsystem over `base_store` and start the background
    /// loops.
    pub async fn start(
        cfg: NoiseConfig,
        base_store: Arc<dyn BlockStore>,
        metrics: Arc<Metrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, NoiseError> {
        cfg.validate()
            .map_err(|e| NoiseError::Validation(e.to_string()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let block_size = cfg.performance.block_size;

        // Resilient store core.
        let resilient: Arc<dyn BlockStore> = Arc::new(ResilientStore::new(
            base_store.clone(),
            RetryPolicy {
                attempts: cfg.store.retry_attempts,
                op_timeout: Duration::from_millis(cfg.store_timeout_ms()),
            },
        ));

        // Tiered cache + altruistic arbitration in front of it.
        let adaptive = Arc::new(AdaptiveCache::new(AdaptiveCacheConfig {
            max_bytes: cfg.cache.memory_limit_mb * 1024 * 1024,
            max_items: cfg.cache.block_cache_size,
            ..AdaptiveCacheConfig::default()
        }));
        let cache = Arc::new(AltruisticCache::new(
            adaptive.clone(),
            AltruisticConfig {
                min_personal_cache_bytes: cfg.cache.min_personal_cache_mb * 1024 * 1024,
                enable_altruistic: cfg.cache.enable_altruistic,
                ..AltruisticConfig::default()
            },
        ));
        if cfg.cache.enable_adaptive_cache {
            tasks.push(spawn_cache_maintenance(adaptive.clone(), shutdown_rx.clone()));
        }
        let store: Arc<dyn BlockStore> = Arc::new(CachedStore::new(
            resilient.clone(),
            cache.clone(),
            metrics.clone(),
        ));

        // Popularity, pool, enforcer.
        let popularity = Arc::new(PopularityTracker::new(PopularityConfig::default()));
        tasks.push(spawn_popularity_refresh(
            popularity.clone(),
            shutdown_rx.clone(),
        ));
        let pool = Arc::new(UniversalPool::new(
            PoolConfig {
                max_size: cfg.reuse.pool_max_size,
                min_reuse_count: cfg.reuse.min_reuse_count,
                min_public_domain_fraction: cfg.reuse.public_domain_ratio,
                seed_blocks: cfg.reuse.seed_blocks,
                block_size,
            },
            store.clone(),
            popularity.clone(),
        ));
        pool.initialize(cfg.reuse.corpus_path.as_deref())
            .await
            .map_err(|e| match e {
                crate::core::pool::PoolError::Store(s) => s.into(),
                other => NoiseError::Validation(other.to_string()),
            })?;
        let enforcer = Arc::new(ReuseEnforcer::new(
            pool.clone(),
            ReusePolicy {
                public_domain_ratio: cfg.reuse.public_domain_ratio,
                randomizers_per_block: 2,
            },
        ));

        // Relay stack. In-process deployments answer from the local store;
        // a remote transport slots in behind the same trait.
        let relay_identity = RelayIdentity::load_or_create(&cfg.node.data_dir)
            .map_err(|_| NoiseError::CryptoFailure)?;
        let transport = Arc::new(StoreRelayTransport::new(
            resilient.clone(),
            relay_identity.public_key(),
        ));
        let relay_public = transport.public_key();
        let mut endpoints = cfg.relay.endpoints.clone();
        if endpoints.is_empty() {
            endpoints = (0..cfg.relay.min_relays.max(1))
                .map(|i| format!("local-{i}"))
                .collect();
        }
        let strategy = LoadBalanceStrategy::from_str(&cfg.relay.load_balance_strategy)
            .unwrap_or(LoadBalanceStrategy::LatencyWeighted);
        let relay_pool = Arc::new(RelayPool::new(
            RelayPoolConfig {
                max_relays: cfg.relay.max_relays,
                min_relays: cfg.relay.min_relays,
                health_check_interval: Duration::from_millis(cfg.relay.health_check_interval_ms),
                max_relay_age: Duration::from_millis(cfg.relay.max_relay_age_ms),
                strategy,
            },
            transport.clone(),
            endpoints,
        ));
        let relay_client = Arc::new(
            RelayClient::new(
                &relay_identity,
                &relay_public,
                relay_pool.clone(),
                Duration::from_secs(60),
                cfg.relay.privacy_level,
            )
            .map_err(|_| NoiseError::CryptoFailure)?,
        );
        let health_session = Arc::new(
            RelayClient::health_session(&relay_identity, &relay_public)
                .map_err(|_| NoiseError::CryptoFailure)?,
        );
        tasks.push(spawn_relay_health(
            relay_pool.clone(),
            health_session,
            shutdown_rx.clone(),
        ));

        // Cover traffic + mixer.
        let cover = Arc::new(CoverTrafficGenerator::new(
            CoverConfig {
                noise_ratio: cfg.mixing.noise_ratio,
                min_requests: cfg.mixing.min_cover_requests,
                max_requests: cfg.mixing.max_cover_requests,
                interval: Duration::from_millis(cfg.mixing.cover_interval_ms),
                random_delay: Duration::from_millis(cfg.mixing.random_delay_ms),
                bandwidth_limit: cfg.mixing.bandwidth_limit,
                block_size,
            },
            popularity.clone(),
            relay_client.clone(),
            metrics.clone(),
        ));
        tasks.push(spawn_cover_traffic(cover.clone(), shutdown_rx.clone()));

        let (mixer, mixer_task) = RequestMixer::start(
            MixerConfig {
                min_mix_size: cfg.mixing.min_mix_size,
                max_mix_size: cfg.mixing.max_mix_size,
                batch_timeout: Duration::from_millis(cfg.mixing.batch_timeout_ms),
                cover_ratio: cfg.mixing.cover_ratio,
                temporal_jitter: Duration::from_millis(cfg.mixing.temporal_jitter_ms),
                mixing_delay: Duration::from_millis(cfg.mixing.mixing_delay_ms),
                max_concurrent: cfg.mixing.max_concurrent,
            },
            relay_client.clone(),
            popularity.clone(),
            cache.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        );
        tasks.push(mixer_task);

        // Peer manager.
        let peers = Arc::new(PeerManager::new(PeerManagerConfig::default()));
        tasks.push(spawn_peer_maintenance(peers.clone(), shutdown_rx.clone()));

        // Hourly pool upkeep: drop unreferenced aged entries, refresh
        // gauges, expire unanswered relay correlations.
        {
            let pool = pool.clone();
            let relay_client = relay_client.clone();
            let metrics = metrics.clone();
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(3600));
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let dropped = pool.prune_unused(24 * 3600 * 1000);
                            if dropped > 0 {
                                tracing::debug!(dropped, "pool entries pruned");
                            }
                            let expired = relay_client.expire_pending(Duration::from_secs(600));
                            if expired > 0 {
                                tracing::debug!(expired, "stale relay correlations dropped");
                            }
                            let stats = pool.stats();
                            metrics.pool_size.set(stats.size as i64);
                            metrics
                                .pool_public_domain_milli
                                .set((stats.public_domain_fraction * 1000.0) as i64);
                        }
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        // Descriptor store.
        let descriptors = match descriptor_crypto(&cfg)? {
            Some(crypto) => Arc::new(DescriptorStore::with_crypto(store.clone(), crypto)),
            None => Arc::new(DescriptorStore::new(store.clone())),
        };

        let client = AnonymizationClient::new(
            store,
            enforcer,
            descriptors,
            Some(Arc::new(mixer)),
            metrics.clone(),
            block_size,
        );

        info!(name = %cfg.node.name, "coordinator started");
        Ok(Self {
            cfg,
            client,
            cache,
            pool,
            popularity,
            peers,
            relay_pool,
            cover,
            metrics,
            audit,
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    /// Upload a plaintext stream. Emits a compliance event carrying the
    /// privacy score.
    pub async fn upload<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        cancel: &CancelSignal,
    ) -> Result<UploadReceipt, NoiseError> {
        let result = self.client.upload(reader, cancel).await;
        match result {
            Ok(descriptor_id) => {
                let descriptor = self.client.load_descriptor(&descriptor_id).await?;
                let score = self.privacy_score(&descriptor);
                self.metrics.uploads_total.inc();
                self.sync_gauges();
                self.audit_event("upload", "ok", &[("privacy_score", format!("{score:.2}"))]);
                Ok(UploadReceipt {
                    descriptor_id,
                    privacy_score: score,
                    blocks: descriptor.block_count(),
                })
            }
            Err(e) => {
                self.metrics.upload_failures_total.inc();
                self.audit_event("upload", e.kind(), &[]);
                // User-visible form never exposes internal ids.
                warn!(kind = e.kind(), "upload failed");
                Err(e)
            }
        }
    }

    /// Download a file by descriptor id into `out`.
    pub async fn download<W: AsyncWrite + Unpin>(
        &self,
        descriptor_id: &BlockId,
        out: &mut W,
        cancel: &CancelSignal,
    ) -> Result<u64, NoiseError> {
        // Distinguish a missing descriptor from missing blocks for recovery.
        match self.client.load_descriptor(descriptor_id).await {
            Ok(_) => {}
            Err(NoiseError::NotFound) => {
                self.metrics.download_failures_total.inc();
                self.audit_event("download", "descriptor_not_found", &[]);
                return Err(NoiseError::NotFound);
            }
            Err(e) => {
                self.metrics.download_failures_total.inc();
                self.audit_event("download", e.kind(), &[]);
                return Err(e);
            }
        }

        match self.client.download(descriptor_id, out, cancel).await {
            Ok(written) => {
                self.metrics.downloads_total.inc();
                self.sync_gauges();
                self.audit_event("download", "ok", &[("bytes", written.to_string())]);
                Ok(written)
            }
            Err(e) => {
                self.metrics.download_failures_total.inc();
                let outcome = match &e {
                    NoiseError::NotFound => "block_not_found",
                    other => other.kind(),
                };
                self.audit_event("download", outcome, &[]);
                warn!(kind = e.kind(), "download failed");
                Err(e)
            }
        }
    }

    /// Composite privacy score: 0.7 base, +0.1 reuse proof present, +0.1
    /// public-domain content mixed, +0.1 cover traffic active.
    pub fn privacy_score(&self, descriptor: &Descriptor) -> f64 {
        let proof: &ReuseProof = &descriptor.reuse_proof;
        let mut score = 0.7;
        if proof.reused + proof.fresh > 0 {
            score += 0.1;
        }
        if proof.public_domain > 0 {
            score += 0.1;
        }
        if self.cover.active() {
            score += 0.1;
        }
        score
    }

    /// Feed a gossip connection event into the peer manager.
    pub fn handle_p2p_event(&self, event: P2pEvent) {
        match event {
            P2pEvent::PeerConnected(id) => self.peers.on_connected(id),
            P2pEvent::PeerDisconnected(id) => self.peers.on_disconnected(&id),
        }
    }

    /// Feed a gossiped inventory announcement into the peer manager.
    pub fn handle_inventory(&self, peer: libp2p::PeerId, announce: InventoryAnnounce) {
        let score = announce.randomizer_score_milli as f64 / 1000.0;
        for id in &announce.blocks {
            self.popularity
                .record_peer_report(id, self.peers.peers_with(id).len() as u32 + 1);
        }
        self.peers.update_inventory(&peer, &announce.blocks, score);
    }

    fn sync_gauges(&self) {
        let cache = self.cache.stats();
        self.metrics.cache_bytes.set(cache.total_bytes as i64);
        let pool = self.pool.stats();
        self.metrics.pool_size.set(pool.size as i64);
        self.metrics
            .pool_public_domain_milli
            .set((pool.public_domain_fraction * 1000.0) as i64);
    }

    fn audit_event(&self, event_type: &str, outcome: &str, metadata: &[(&str, String)]) {
        let mut meta = CanonicalMap::new();
        for (k, v) in metadata {
            meta.insert((*k).to_string(), v.clone());
        }
        self.audit.log_event(AuditEvent {
            event_type: event_type.to_string(),
            subject: self.cfg.node.name.clone(),
            object: "file".to_string(),
            outcome: outcome.to_string(),
            metadata: meta,
        });
    }

    /// Subsystem accessors, mainly for stats surfaces and tests.
    pub fn cache(&self) -> &Arc<AltruisticCache> {
        &self.cache
    }
    /// Universal pool.
    pub fn pool(&self) -> &Arc<UniversalPool> {
        &self.pool
    }
    /// Popularity tracker.
    pub fn popularity(&self) -> &Arc<PopularityTracker> {
        &self.popularity
    }
    /// Peer manager.
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }
    /// Relay pool.
    pub fn relay_pool(&self) -> &Arc<RelayPool> {
        &self.relay_pool
    }
    /// Cover generator.
    pub fn cover(&self) -> &Arc<CoverTrafficGenerator> {
        &self.cover
    }
    /// Configuration in use.
    pub fn config(&self) -> &NoiseConfig {
        &self.cfg
    }

    /// Stop every background task and wait for them. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("coordinator stopped");
    }
}
