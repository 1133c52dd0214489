// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use noisefs::core::blocks::{content_hash, Block};
use noisefs::core::store::{
    BlockStore, MemoryStore, ResilientStore, RetryPolicy, SledStore, StoreError,
};
use noisefs::core::types::BlockAddress;

#[tokio::test]
async fn memory_store_roundtrip_and_pin() {
    let store = MemoryStore::new();
    let block = Block::from_bytes(vec![42u8; 1024]);

    let addr = store.put(&block).await.unwrap();
    assert_eq!(addr.id, block.id());
    assert_eq!(addr.size, 1024);
    assert!(store.has(&addr).await.unwrap());

    let fetched = store.get(&addr).await.unwrap();
    assert_eq!(fetched.bytes(), block.bytes());

    store.pin(&addr).await.unwrap();
    store.unpin(&addr).await.unwrap();

    let absent = BlockAddress::for_id(store.backend(), content_hash(b"absent"));
    assert_eq!(store.get(&absent).await, Err(StoreError::NotFound));
    assert_eq!(store.pin(&absent).await, Err(StoreError::NotFound));
}

#[tokio::test]
async fn sled_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let block = Block::from_bytes(vec![7u8; 2048]);
    let addr = {
        let db = sled::open(dir.path().join("db")).unwrap();
        let store = SledStore::open(&db).unwrap();
        store.put(&block).await.unwrap()
    };

    let db = sled::open(dir.path().join("db")).unwrap();
    let store = SledStore::open(&db).unwrap();
    let fetched = store.get(&addr).await.unwrap();
    assert_eq!(fetched.bytes(), block.bytes());
    assert!(store.has(&addr).await.unwrap());
}

#[tokio::test]
async fn batch_helpers_roundtrip() {
    let store = MemoryStore::new();
    let blocks: Vec<Block> = (0u8..4).map(|n| Block::from_bytes(vec![n; 512])).collect();
    let addrs = store.put_many(&blocks).await.unwrap();
    assert_eq!(addrs.len(), 4);
    let fetched = store.get_many(&addrs).await.unwrap();
    for (a, b) in fetched.iter().zip(&blocks) {
        assert_eq!(a.bytes(), b.bytes());
    }
}

// NotFound is surfaced immediately, without burning retry budget.
#[tokio::test]
async fn resilient_store_does_not_retry_not_found() {
    let inner: Arc<dyn BlockStore> = Arc::new(MemoryStore::new());
    let store = ResilientStore::new(
        inner,
        RetryPolicy {
            attempts: 3,
            op_timeout: Duration::from_secs(5),
        },
    );
    let absent = BlockAddress::for_id(store.backend(), content_hash(b"gone"));
    let started = std::time::Instant::now();
    assert_eq!(store.get(&absent).await, Err(StoreError::NotFound));
    // Three backoff rounds would take at least 1.4s.
    assert!(started.elapsed() < Duration::from_millis(500));
}
