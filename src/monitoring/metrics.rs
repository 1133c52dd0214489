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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Completed uploads.
    pub uploads_total: IntCounter,
    /// Completed downloads.
    pub downloads_total: IntCounter,
    /// Failed uploads.
    pub upload_failures_total: IntCounter,
    /// Failed downloads.
    pub download_failures_total: IntCounter,
    /// Anonymized blocks written to the store.
    pub blocks_stored_total: IntCounter,
    /// Plaintext bytes anonymized.
    pub bytes_anonymized_total: IntCounter,

    /// Cache hits.
    pub cache_hits_total: IntCounter,
    /// Cache misses.
    pub cache_misses_total: IntCounter,
    /// Resident cache bytes.
    pub cache_bytes: IntGauge,

    /// Pool entries resident.
    pub pool_size: IntGauge,
    /// Pool public-domain fraction, in thousandths.
    pub pool_public_domain_milli: IntGauge,

    /// Cover requests dispatched.
    pub cover_requests_total: IntCounter,
    /// Real requests dispatched through the mixer.
    pub real_requests_total: IntCounter,
    /// Mixer batches dispatched.
    pub mixer_batches_total: IntCounter,
    /// Submissions rejected busy.
    pub mixer_rejected_total: IntCounter,
    /// Relay health-check failures.
    pub relay_unhealthy_total: IntCounter,

    /// Connected gossip peers.
    pub p2p_peers: IntGauge,
    /// Invalid decoded gossip messages.
    pub p2p_invalid_msg_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let uploads_total = IntCounter::new("noisefs_uploads_total", "Completed uploads")
            .map_err(|_| MetricsError::Prom)?;
        let downloads_total = IntCounter::new("noisefs_downloads_total", "Completed downloads")
            .map_err(|_| MetricsError::Prom)?;
        let upload_failures_total =
            IntCounter::new("noisefs_upload_failures_total", "Failed uploads")
                .map_err(|_| MetricsError::Prom)?;
        let download_failures_total =
            IntCounter::new("noisefs_download_failures_total", "Failed downloads")
                .map_err(|_| MetricsError::Prom)?;
        let blocks_stored_total =
            IntCounter::new("noisefs_blocks_stored_total", "Anonymized blocks stored")
                .map_err(|_| MetricsError::Prom)?;
        let bytes_anonymized_total =
            IntCounter::new("noisefs_bytes_anonymized_total", "Plaintext bytes anonymized")
                .map_err(|_| MetricsError::Prom)?;

        let cache_hits_total = IntCounter::new("noisefs_cache_hits_total", "Cache hits")
            .map_err(|_| MetricsError::Prom)?;
        let cache_misses_total = IntCounter::new("noisefs_cache_misses_total", "Cache misses")
            .map_err(|_| MetricsError::Prom)?;
        let cache_bytes = IntGauge::new("noisefs_cache_bytes", "Resident cache bytes")
            .map_err(|_| MetricsError::Prom)?;

        let pool_size = IntGauge::new("noisefs_pool_size", "Pool entries resident")
            .map_err(|_| MetricsError::Prom)?;
        let pool_public_domain_milli = IntGauge::new(
            "noisefs_pool_public_domain_milli",
            "Pool public-domain fraction (thousandths)",
        )
        .map_err(|_| MetricsError::Prom)?;

        let cover_requests_total =
            IntCounter::new("noisefs_cover_requests_total", "Cover requests dispatched")
                .map_err(|_| MetricsError::Prom)?;
        let real_requests_total =
            IntCounter::new("noisefs_real_requests_total", "Real mixed requests dispatched")
                .map_err(|_| MetricsError::Prom)?;
        let mixer_batches_total =
            IntCounter::new("noisefs_mixer_batches_total", "Mixer batches dispatched")
                .map_err(|_| MetricsError::Prom)?;
        let mixer_rejected_total =
            IntCounter::new("noisefs_mixer_rejected_total", "Mixer submissions rejected busy")
                .map_err(|_| MetricsError::Prom)?;
        let relay_unhealthy_total =
            IntCounter::new("noisefs_relay_unhealthy_total", "Relay health-check failures")
                .map_err(|_| MetricsError::Prom)?;

        let p2p_peers = IntGauge::new("noisefs_p2p_peers", "Connected gossip peers")
            .map_err(|_| MetricsError::Prom)?;
        let p2p_invalid_msg_total =
            IntCounter::new("noisefs_p2p_invalid_msg_total", "Invalid decoded gossip messages")
                .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(uploads_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(downloads_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(upload_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(download_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(blocks_stored_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(bytes_anonymized_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(cache_hits_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(cache_misses_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(cache_bytes.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(pool_size.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(pool_public_domain_milli.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(cover_requests_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(real_requests_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(mixer_batches_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(mixer_rejected_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(relay_unhealthy_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(p2p_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(p2p_invalid_msg_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            uploads_total,
            downloads_total,
            upload_failures_total,
            download_failures_total,
            blocks_stored_total,
            bytes_anonymized_total,
            cache_hits_total,
            cache_misses_total,
            cache_bytes,
            pool_size,
            pool_public_domain_milli,
            cover_requests_total,
            real_requests_total,
            mixer_batches_total,
            mixer_rejected_total,
            relay_unhealthy_total,
            p2p_peers,
            p2p_invalid_msg_total,
        })
    }
}
