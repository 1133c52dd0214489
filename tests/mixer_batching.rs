// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use noisefs::core::blocks::Block;
use noisefs::core::cache::{AdaptiveCache, AdaptiveCacheConfig, AltruisticCache, AltruisticConfig};
use noisefs::core::pool::{PopularityConfig, PopularityTracker};
use noisefs::core::store::{BlockStore, MemoryStore};
use noisefs::core::types::BlockId;
use noisefs::monitoring::metrics::Metrics;
use noisefs::networking::mixer::{MixerConfig, MixerError, Priority, RequestMixer};
use noisefs::networking::relay::{
    LoadBalanceStrategy, RelayClient, RelayIdentity, RelayPool, RelayPoolConfig,
    StoreRelayTransport,
};
use tokio::sync::watch;

struct Rig {
    mixer: RequestMixer,
    metrics: Arc<Metrics>,
    cache: Arc<AltruisticCache>,
    popularity: Arc<PopularityTracker>,
    _shutdown: watch::Sender<bool>,
}

async fn rig(store: Arc<MemoryStore>, cfg: MixerConfig) -> Rig {
    let identity = RelayIdentity::generate();
    let store_dyn: Arc<dyn BlockStore> = store;
    let transport = Arc::new(StoreRelayTransport::new(store_dyn, identity.public_key()));
    let relay_public = transport.public_key();
    let pool = Arc::new(RelayPool::new(
        RelayPoolConfig {
            max_relays: 2,
            min_relays: 1,
            health_check_interval: Duration::from_secs(60),
            max_relay_age: Duration::from_secs(3600),
            strategy: LoadBalanceStrategy::Random,
        },
        transport,
        vec!["relay-test".to_string()],
    ));
    let relay = Arc::new(
        RelayClient::new(&identity, &relay_public, pool, Duration::from_secs(60), 1).unwrap(),
    );
    let popularity = Arc::new(PopularityTracker::new(PopularityConfig::default()));
    let cache = Arc::new(AltruisticCache::new(
        Arc::new(AdaptiveCache::new(AdaptiveCacheConfig::default())),
        AltruisticConfig::default(),
    ));
    let metrics = Arc::new(Metrics::new().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mixer, _task) = RequestMixer::start(
        cfg,
        relay,
        popularity.clone(),
        cache.clone(),
        metrics.clone(),
        shutdown_rx,
    );
    Rig {
        mixer,
        metrics,
        cache,
        popularity,
        _shutdown: shutdown_tx,
    }
}

fn fast_config() -> MixerConfig {
    MixerConfig {
        min_mix_size: 2,
        max_mix_size: 8,
        batch_timeout: Duration::from_millis(50),
        cover_ratio: 0.5,
        temporal_jitter: Duration::from_millis(0),
        mixing_delay: Duration::from_millis(5),
        max_concurrent: 32,
    }
}

async fn seeded_store(count: u32) -> (Arc<MemoryStore>, Vec<BlockId>) {
    let store = Arc::new(MemoryStore::new());
    let mut ids = Vec::new();
    for n in 0..count {
        let block = Block::from_bytes(vec![n as u8; 2048]);
        ids.push(block.id());
        store.put(&block).await.unwrap();
    }
    (store, ids)
}

// Real requests come back with the right bytes, decoys are interleaved, and
// responses land in the cache even though callers already got their copy.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_fetches_resolve_and_cache() {
    let (store, ids) = seeded_store(6).await;
    let r = rig(store, fast_config()).await;
    // Give the decoy picker something popular to draw from.
    for id in &ids {
        r.popularity.record_access(id);
    }
    r.popularity.refresh(noisefs::core::types::now_ms());

    let receivers: Vec<_> = ids
        .iter()
        .map(|id| r.mixer.submit(*id, Priority::Normal).unwrap())
        .collect();
    for (rx, id) in receivers.into_iter().zip(&ids) {
        let block = rx.await.unwrap().unwrap();
        assert_eq!(block.id(), *id);
        assert!(r.cache.contains(id), "response not cached");
    }

    assert!(r.metrics.mixer_batches_total.get() >= 1);
    assert_eq!(r.metrics.real_requests_total.get(), 6);
    // cover_ratio 0.5 interleaves decoys alongside the real traffic.
    assert!(r.metrics.cover_requests_total.get() >= 1);
}

// An under-filled batch is padded with decoys at timeout so dispatched
// batches stay inside [min_mix_size, max_mix_size].
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_request_is_padded_to_batch_floor() {
    let (store, ids) = seeded_store(4).await;
    let r = rig(store, fast_config()).await;
    for id in &ids {
        r.popularity.record_access(id);
    }
    r.popularity.refresh(noisefs::core::types::now_ms());

    let rx = r.mixer.submit(ids[0], Priority::High).unwrap();
    let block = rx.await.unwrap().unwrap();
    assert_eq!(block.id(), ids[0]);

    // One real plus at least one decoy to reach the floor of two.
    assert_eq!(r.metrics.real_requests_total.get(), 1);
    assert!(r.metrics.cover_requests_total.get() >= 1);
}

// A partially-starved popularity tracker (some popular blocks, fewer than
// the decoy request) still pads the batch to the floor by repeating the
// targets it knows.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_tracker_still_pads_to_floor() {
    let (store, ids) = seeded_store(4).await;
    let cfg = MixerConfig {
        min_mix_size: 3,
        max_mix_size: 8,
        ..fast_config()
    };
    let r = rig(store, cfg).await;
    // The tracker knows exactly one block; the floor needs two decoys.
    r.popularity.record_access(&ids[1]);

    let rx = r.mixer.submit(ids[0], Priority::Normal).unwrap();
    let block = rx.await.unwrap().unwrap();
    assert_eq!(block.id(), ids[0]);

    // One real plus the single known target repeated to reach the floor.
    assert_eq!(r.metrics.real_requests_total.get(), 1);
    assert!(r.metrics.cover_requests_total.get() >= 2);
}

// A missing block surfaces NotFound to the caller.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_block_surfaces_not_found() {
    let (store, ids) = seeded_store(2).await;
    let r = rig(store, fast_config()).await;
    for id in &ids {
        r.popularity.record_access(id);
    }

    let absent = noisefs::core::blocks::content_hash(b"nope");
    let rx = r.mixer.submit(absent, Priority::Normal).unwrap();
    assert_eq!(rx.await.unwrap(), Err(MixerError::NotFound));
}

// Submissions beyond the bounded queue are rejected busy once the task has
// stopped draining.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overflow_is_rejected() {
    let (store, ids) = seeded_store(1).await;
    let cfg = MixerConfig {
        min_mix_size: 64,
        max_mix_size: 64,
        batch_timeout: Duration::from_secs(30),
        max_concurrent: 2,
        ..fast_config()
    };
    let r = rig(store, cfg).await;

    // The batching task drains into its backlog, so overfill faster than it
    // can pull: stop the rig's task first by dropping the shutdown sender.
    drop(r._shutdown);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut saw_reject = false;
    for _ in 0..8 {
        match r.mixer.submit(ids[0], Priority::Normal) {
            Ok(_) | Err(MixerError::Busy) => {
                if let Err(MixerError::Busy) = r.mixer.submit(ids[0], Priority::Normal) {
                    saw_reject = true;
                    break;
                }
            }
            Err(MixerError::Closed) => {
                saw_reject = true;
                break;
            }
            Err(_) => {}
        }
    }
    assert!(saw_reject, "queue never rejected submissions");
}
