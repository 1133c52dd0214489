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

//! Anonymization pipeline.
//!
//! Upload: split, plan the mix, XOR each plaintext block with its selected
//! randomizers (and public-domain blocks), store the anonymized outputs,
//! then assemble and store the descriptor. Every anonymized-block write
//! happens before the descriptor write; the descriptor id is returned only
//! once all referenced blocks are durably stored. Cancellation mid-upload
//! leaves stored blocks behind (indistinguishable from any other block),
//! never writes the descriptor, and never rolls back reuse counters.
//!
//! Download: fetch the descriptor, fetch each entry through the mixer
//! (direct store fallback), XOR back to plaintext, stream out in order.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::core::blocks::{xor_combine, Block, Splitter};
use crate::core::descriptors::{
    Descriptor, DescriptorEntry, DescriptorStore, DescriptorStoreError, MixingSummary,
};
use crate::core::error::NoiseError;
use crate::core::pool::{EnforcerError, MixOutcome, PoolError, ReuseEnforcer};
use crate::core::store::BlockStore;
use crate::core::types::{now_ms, BlockAddress, BlockId, CancelSignal};
use crate::monitoring::metrics::Metrics;
use crate::networking::mixer::{MixerError, Priority, RequestMixer};

fn map_descriptor_err(e: DescriptorStoreError) -> NoiseError {
    match e {
        DescriptorStoreError::Store(s) => s.into(),
        DescriptorStoreError::Descriptor(d) => NoiseError::Validation(d.to_string()),
        DescriptorStoreError::Crypto | DescriptorStoreError::MissingKey => {
            NoiseError::CryptoFailure
        }
    }
}

fn map_enforcer_err(e: EnforcerError) -> NoiseError {
    match e {
        EnforcerError::Insufficient => NoiseError::InsufficientRandomizers,
        EnforcerError::PolicyViolated => NoiseError::Validation("mixing policy".to_string()),
        EnforcerError::Pool(PoolError::Insufficient) => NoiseError::InsufficientRandomizers,
        EnforcerError::Pool(PoolError::Store(s)) => s.into(),
        EnforcerError::Pool(_) => NoiseError::Validation("pool corpus".to_string()),
    }
}

/// Upload/download pipeline over the wired subsystems.
pub struct AnonymizationClient {
    store: Arc<dyn BlockStore>,
    enforcer: Arc<ReuseEnforcer>,
    descriptors: Arc<DescriptorStore>,
    mixer: Option<Arc<RequestMixer>>,
    metrics: Arc<Metrics>,
    block_size: usize,
}

impl AnonymizationClient {
    /// Build the pipeline. `store` is the cache-fronted resilient store;
    /// `mixer` is optional so tools and tests can run without the relay
    /// stack.
    pub fn new(
        store: Arc<dyn BlockStore>,
        enforcer: Arc<ReuseEnforcer>,
        descriptors: Arc<DescriptorStore>,
        mixer: Option<Arc<RequestMixer>>,
        metrics: Arc<Metrics>,
        block_size: usize,
    ) -> Self {
        Self {
            store,
            enforcer,
            descriptors,
            mixer,
            metrics,
            block_size,
        }
    }

    /// Anonymize and store a plaintext stream; returns the descriptor's
    /// content id.
    pub async fn upload<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        cancel: &CancelSignal,
    ) -> Result<BlockId, NoiseError> {
        let mut splitter = Splitter::new(reader, self.block_size)
            .map_err(|e| NoiseError::Validation(e.to_string()))?;

        let mut split = Vec::new();
        let mut file_size: u64 = 0;
        while let Some(sb) = splitter
            .next_block()
            .await
            .map_err(|e| NoiseError::Validation(e.to_string()))?
        {
            if cancel.is_cancelled() {
                return Err(NoiseError::Cancelled);
            }
            file_size += sb.len as u64;
            split.push(sb);
        }

        let plan = self.enforcer.plan_mix(split.len());
        let mut entries = Vec::with_capacity(split.len());
        let mut outcome = MixOutcome::default();

        for (i, sb) in split.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(NoiseError::Cancelled);
            }
            let mix = plan.per_block[i];
            let (randomizers, public_domain) = self
                .enforcer
                .select_for_block(self.block_size, mix)
                .await
                .map_err(map_enforcer_err)?;

            let mut parts: Vec<&Block> = Vec::with_capacity(1 + randomizers.len() + public_domain.len());
            parts.push(&sb.block);
            parts.extend(randomizers.iter().map(|s| &s.block));
            parts.extend(public_domain.iter().map(|s| &s.block));
            let anonymized =
                xor_combine(&parts).map_err(|e| NoiseError::Validation(e.to_string()))?;

            let addr = self.store.put(&anonymized).await.map_err(NoiseError::from)?;
            self.metrics.blocks_stored_total.inc();

            // Reuse accounting is conservative: counted once the anonymized
            // block is stored, kept on cancellation.
            let used: Vec<BlockId> = randomizers
                .iter()
                .chain(public_domain.iter())
                .map(|s| s.address.id)
                .collect();
            self.enforcer.pool().record_use(&used);

            entries.push(DescriptorEntry {
                anonymized_id: addr.id,
                randomizer_ids: randomizers.iter().map(|s| s.address.id).collect(),
                public_domain_ids: public_domain.iter().map(|s| s.address.id).collect(),
                len: sb.len as u32,
            });
            outcome.note_block(&randomizers, &public_domain);
        }

        if cancel.is_cancelled() {
            return Err(NoiseError::Cancelled);
        }

        let reuse_proof = self
            .enforcer
            .certify(&plan, &outcome)
            .map_err(map_enforcer_err)?;
        let descriptor = Descriptor {
            file_size,
            block_size: self.block_size as u32,
            entries,
            reuse_proof,
            mixing: MixingSummary {
                min_randomizers: plan.min_randomizers() as u8,
                public_domain_entries: outcome.public_domain_entries as u32,
            },
            created_at_ms: now_ms(),
        };
        let id = self
            .descriptors
            .save(&descriptor)
            .await
            .map_err(map_descriptor_err)?;

        self.metrics.bytes_anonymized_total.inc_by(file_size);
        info!(blocks = descriptor.block_count(), "upload complete");
        Ok(id)
    }

    /// Load a descriptor and its reuse proof without fetching data blocks.
    pub async fn load_descriptor(&self, id: &BlockId) -> Result<Descriptor, NoiseError> {
        self.descriptors.load(id).await.map_err(map_descriptor_err)
    }

    /// Reconstruct a file into `out`; returns bytes written.
    pub async fn download<W: AsyncWrite + Unpin>(
        &self,
        descriptor_id: &BlockId,
        out: &mut W,
        cancel: &CancelSignal,
    ) -> Result<u64, NoiseError> {
        let descriptor = self.load_descriptor(descriptor_id).await?;
        let mut written: u64 = 0;

        for entry in &descriptor.entries {
            if cancel.is_cancelled() {
                return Err(NoiseError::Cancelled);
            }
            // All of an entry's fetches go out together so the mixer can
            // batch them.
            let wanted: Vec<&BlockId> = std::iter::once(&entry.anonymized_id)
                .chain(&entry.randomizer_ids)
                .chain(&entry.public_domain_ids)
                .collect();
            let mut fetched = futures::future::try_join_all(
                wanted.into_iter().map(|id| self.fetch_block(id)),
            )
            .await?;
            let anonymized = fetched.remove(0);
            let components = fetched;

            let mut parts: Vec<&Block> = Vec::with_capacity(1 + components.len());
            parts.push(&anonymized);
            parts.extend(components.iter());
            let plain = xor_combine(&parts).map_err(|_| NoiseError::IntegrityFailure)?;

            // No bytes are yielded before the entry's full XOR completes.
            let take = entry.len as usize;
            out.write_all(&plain.bytes()[..take])
                .await
                .map_err(|_| NoiseError::StoreUnavailable)?;
            written += take as u64;
        }
        out.flush().await.map_err(|_| NoiseError::StoreUnavailable)?;
        Ok(written)
    }

    // Mixed fetch with direct-store fallback.
    async fn fetch_block(&self, id: &BlockId) -> Result<Block, NoiseError> {
        if let Some(mixer) = &self.mixer {
            match mixer.submit(*id, Priority::Normal) {
                Ok(receiver) => match receiver.await {
                    Ok(Ok(block)) => return Ok(block),
                    Ok(Err(e)) => {
                        debug!(err = %e, "mixer fetch failed; falling back to direct read");
                    }
                    Err(_) => {
                        debug!("mixer dropped response; falling back to direct read");
                    }
                },
                Err(MixerError::Busy) => {
                    self.metrics.mixer_rejected_total.inc();
                    debug!("mixer busy; falling back to direct read");
                }
                Err(e) => {
                    debug!(err = %e, "mixer unavailable; falling back to direct read");
                }
            }
        }
        let addr = BlockAddress::for_id(self.store.backend(), *id);
        self.store.get(&addr).await.map_err(NoiseError::from)
    }
}
