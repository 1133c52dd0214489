// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use noisefs::client::AnonymizationClient;
use noisefs::core::blocks::{content_hash, split_bytes};
use noisefs::core::descriptors::{DescriptorCrypto, DescriptorStore};
use noisefs::core::error::NoiseError;
use noisefs::core::pool::{
    PoolConfig, PopularityConfig, PopularityTracker, ReuseEnforcer, ReusePolicy, UniversalPool,
};
use noisefs::core::store::{BlockStore, MemoryStore};
use noisefs::core::types::{BlockId, CancelHandle, CancelSignal};
use noisefs::monitoring::metrics::Metrics;

const BLOCK_SIZE: usize = 128 * 1024;

struct Harness {
    store: Arc<MemoryStore>,
    pool: Arc<UniversalPool>,
    client: AnonymizationClient,
}

async fn harness(seed_blocks: usize, pool_max: usize, encrypt: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn BlockStore> = store.clone();
    let popularity = Arc::new(PopularityTracker::new(PopularityConfig::default()));
    let pool = Arc::new(UniversalPool::new(
        PoolConfig {
            max_size: pool_max,
            min_reuse_count: 2,
            min_public_domain_fraction: 0.3,
            seed_blocks,
            block_size: BLOCK_SIZE,
        },
        store_dyn.clone(),
        popularity.clone(),
    ));
    pool.initialize(None).await.expect("pool init");
    let enforcer = Arc::new(ReuseEnforcer::new(
        pool.clone(),
        ReusePolicy {
            public_domain_ratio: 0.3,
            randomizers_per_block: 2,
        },
    ));
    let descriptors = if encrypt {
        Arc::new(DescriptorStore::with_crypto(
            store_dyn.clone(),
            DescriptorCrypto::from_key_bytes([9u8; 32]),
        ))
    } else {
        Arc::new(DescriptorStore::new(store_dyn.clone()))
    };
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let client = AnonymizationClient::new(
        store_dyn,
        enforcer,
        descriptors,
        None,
        metrics,
        BLOCK_SIZE,
    );
    Harness {
        store,
        pool,
        client,
    }
}

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// S1: 300000 bytes at 128 KiB blocks round-trips byte for byte through a
// 3-entry descriptor, and no stored block equals any plaintext block.
#[tokio::test]
async fn small_file_roundtrip() {
    let h = harness(16, 64, false).await;
    let data = pattern_bytes(300_000);
    let cancel = CancelSignal::never();

    let descriptor_id = h.client.upload(data.as_slice(), &cancel).await.expect("upload");

    let descriptor = h.client.load_descriptor(&descriptor_id).await.expect("descriptor");
    assert_eq!(descriptor.entries.len(), 3);
    assert_eq!(descriptor.file_size, 300_000);
    for entry in &descriptor.entries {
        assert!(entry.randomizer_ids.len() >= 2);
    }

    let mut out = Vec::new();
    let written = h
        .client
        .download(&descriptor_id, &mut out, &cancel)
        .await
        .expect("download");
    assert_eq!(written, 300_000);
    assert_eq!(out, data);

    // No plaintext at rest: every stored id differs from every plaintext
    // block hash.
    let plaintext_ids: HashSet<BlockId> = split_bytes(&data, BLOCK_SIZE)
        .unwrap()
        .iter()
        .map(|sb| sb.block.id())
        .collect();
    for stored in h.store.ids() {
        assert!(!plaintext_ids.contains(&stored), "plaintext block at rest");
    }
}

// S2: two distinct 1 MiB uploads share at least one randomizer, whose reuse
// count ends at 2 or more.
#[tokio::test]
async fn randomizer_reuse_across_uploads() {
    let h = harness(16, 16, false).await;
    let cancel = CancelSignal::never();

    let file_a = pattern_bytes(1024 * 1024);
    let mut file_b = pattern_bytes(1024 * 1024);
    file_b.reverse();

    let id_a = h.client.upload(file_a.as_slice(), &cancel).await.expect("upload a");
    let id_b = h.client.upload(file_b.as_slice(), &cancel).await.expect("upload b");

    let da = h.client.load_descriptor(&id_a).await.unwrap();
    let db = h.client.load_descriptor(&id_b).await.unwrap();

    let ra: HashSet<BlockId> = da
        .entries
        .iter()
        .flat_map(|e| e.randomizer_ids.iter().copied())
        .collect();
    let rb: HashSet<BlockId> = db
        .entries
        .iter()
        .flat_map(|e| e.randomizer_ids.iter().copied())
        .collect();
    let shared: Vec<&BlockId> = ra.intersection(&rb).collect();
    assert!(!shared.is_empty(), "uploads share no randomizer");
    for id in shared {
        assert!(h.pool.reuse_count(id).unwrap_or(0) >= 2);
    }
}

// Reuse counters never decrease (spot check across a few uploads).
#[tokio::test]
async fn reuse_counts_are_monotonic() {
    let h = harness(8, 8, false).await;
    let cancel = CancelSignal::never();
    let data = pattern_bytes(256 * 1024);

    let id = h.client.upload(data.as_slice(), &cancel).await.unwrap();
    let d = h.client.load_descriptor(&id).await.unwrap();
    let watched: Vec<BlockId> = d.entries[0].randomizer_ids.clone();
    let before: Vec<u64> = watched
        .iter()
        .map(|r| h.pool.reuse_count(r).unwrap_or(0))
        .collect();

    let _ = h.client.upload(data.as_slice(), &cancel).await.unwrap();
    for (r, prev) in watched.iter().zip(before) {
        assert!(h.pool.reuse_count(r).unwrap_or(0) >= prev);
    }
}

// Encrypted descriptors round-trip; a store without the key cannot parse.
#[tokio::test]
async fn encrypted_descriptor_roundtrip() {
    let h = harness(8, 32, true).await;
    let cancel = CancelSignal::never();
    let data = pattern_bytes(200_000);

    let descriptor_id = h.client.upload(data.as_slice(), &cancel).await.unwrap();
    let mut out = Vec::new();
    h.client
        .download(&descriptor_id, &mut out, &cancel)
        .await
        .unwrap();
    assert_eq!(out, data);
}

// A cancelled upload writes no descriptor and surfaces Cancelled.
#[tokio::test]
async fn cancelled_upload_writes_no_descriptor() {
    let h = harness(8, 32, false).await;
    let (handle, cancel) = CancelHandle::new();
    handle.cancel();

    let before = h.store.len();
    let result = h.client.upload(pattern_bytes(300_000).as_slice(), &cancel).await;
    assert!(matches!(result, Err(NoiseError::Cancelled)));
    // Nothing was stored before the first cancellation checkpoint.
    assert_eq!(h.store.len(), before);
}

// A starved pool aborts the upload instead of downgrading the mix.
#[tokio::test]
async fn starved_pool_blocks_upload() {
    let h = harness(1, 1, false).await;
    let cancel = CancelSignal::never();
    let result = h.client.upload(pattern_bytes(100_000).as_slice(), &cancel).await;
    assert!(matches!(result, Err(NoiseError::InsufficientRandomizers)));
}

// Unknown descriptor ids surface NotFound.
#[tokio::test]
async fn missing_descriptor_is_not_found() {
    let h = harness(4, 16, false).await;
    let cancel = CancelSignal::never();
    let bogus = content_hash(b"no such descriptor");
    let mut out = Vec::new();
    let result = h.client.download(&bogus, &mut out, &cancel).await;
    assert!(matches!(result, Err(NoiseError::NotFound)));
}

// Empty input produces an empty, valid file.
#[tokio::test]
async fn empty_file_roundtrip() {
    let h = harness(4, 16, false).await;
    let cancel = CancelSignal::never();
    let descriptor_id = h.client.upload(&[] as &[u8], &cancel).await.unwrap();
    let mut out = Vec::new();
    let written = h.client.download(&descriptor_id, &mut out, &cancel).await.unwrap();
    assert_eq!(written, 0);
    assert!(out.is_empty());
}
