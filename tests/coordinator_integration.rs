// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::sync::Arc;

use noisefs::client::Coordinator;
use noisefs::core::config::NoiseConfig;
use noisefs::core::error::NoiseError;
use noisefs::core::store::MemoryStore;
use noisefs::core::types::CancelSignal;
use noisefs::monitoring::audit::MemoryAudit;
use noisefs::monitoring::metrics::Metrics;

fn test_config(data_dir: &str) -> NoiseConfig {
    let mut cfg = NoiseConfig::default();
    cfg.node.name = "test-node".to_string();
    cfg.node.data_dir = data_dir.to_string();
    // Small pool keeps the test quick; mixing stays fast and quiet.
    cfg.reuse.seed_blocks = 8;
    cfg.reuse.pool_max_size = 64;
    cfg.performance.block_size = 64 * 1024;
    cfg.mixing.batch_timeout_ms = 50;
    cfg.mixing.temporal_jitter_ms = 0;
    cfg.mixing.mixing_delay_ms = 5;
    cfg.mixing.cover_interval_ms = 3_600_000;
    cfg
}

async fn coordinator(data_dir: &str, audit: Arc<MemoryAudit>) -> Coordinator {
    let cfg = test_config(data_dir);
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    Coordinator::start(cfg, store, metrics, audit)
        .await
        .expect("coordinator start")
}

// Full wiring: upload and download through the coordinator, with the
// privacy score in range and audit events emitted.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coordinated_upload_download() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(MemoryAudit::new());
    let coordinator = coordinator(dir.path().to_str().unwrap(), audit.clone()).await;
    let cancel = CancelSignal::never();

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 239) as u8).collect();
    let receipt = coordinator
        .upload(data.as_slice(), &cancel)
        .await
        .expect("upload");
    assert!(receipt.blocks >= 3);
    assert!((0.7..=1.0).contains(&receipt.privacy_score));

    let mut out = Vec::new();
    let written = coordinator
        .download(&receipt.descriptor_id, &mut out, &cancel)
        .await
        .expect("download");
    assert_eq!(written as usize, data.len());
    assert_eq!(out, data);

    let events = audit.events();
    assert!(events
        .iter()
        .any(|e| e.event_type == "upload" && e.outcome == "ok"));
    assert!(events
        .iter()
        .any(|e| e.event_type == "download" && e.outcome == "ok"));

    coordinator.shutdown().await;
}

// A missing descriptor is audited distinctly from missing blocks.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_descriptor_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(MemoryAudit::new());
    let coordinator = coordinator(dir.path().to_str().unwrap(), audit.clone()).await;
    let cancel = CancelSignal::never();

    let bogus = noisefs::core::blocks::content_hash(b"never stored");
    let mut out = Vec::new();
    let err = coordinator
        .download(&bogus, &mut out, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, NoiseError::NotFound));
    assert!(audit
        .events()
        .iter()
        .any(|e| e.outcome == "descriptor_not_found"));

    coordinator.shutdown().await;
}
