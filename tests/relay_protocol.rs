// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use noisefs::core::blocks::Block;
use noisefs::core::store::{BlockStore, MemoryStore};
use noisefs::core::types::now_ms;
use noisefs::networking::relay::{
    BlockRequest, EnvelopeError, LoadBalanceStrategy, MessageType, RelayClient, RelayEnvelope,
    RelayIdentity, RelayPayload, RelayPool, RelayPoolConfig, ReplayError, ReplayGuard,
    RequestOptions, StoreRelayTransport, REPLAY_WINDOW_MS,
};

fn sample_envelope() -> RelayEnvelope {
    RelayEnvelope {
        msg_type: MessageType::BlockRequest,
        id: "req-42".to_string(),
        timestamp_ms: 1_700_000_000_000,
        ciphertext: vec![1, 2, 3, 4, 5],
    }
}

#[test]
fn envelope_wire_roundtrip() {
    let env = sample_envelope();
    let wire = env.encode();
    assert_eq!(RelayEnvelope::decode(&wire).unwrap(), env);
}

#[test]
fn envelope_rejects_malformed() {
    let env = sample_envelope();
    let wire = env.encode();

    assert_eq!(
        RelayEnvelope::decode(&wire[..wire.len() - 2]),
        Err(EnvelopeError::Truncated)
    );

    let mut bad_version = wire.clone();
    bad_version[0] = 99;
    assert_eq!(
        RelayEnvelope::decode(&bad_version),
        Err(EnvelopeError::Version)
    );

    let mut bad_type = wire.clone();
    bad_type[1] = 17;
    assert_eq!(RelayEnvelope::decode(&bad_type), Err(EnvelopeError::Type));

    let mut trailing = wire;
    trailing.push(0);
    assert_eq!(RelayEnvelope::decode(&trailing), Err(EnvelopeError::Trailing));
}

// Both key holders derive the same box; sealed bytes round-trip and
// tampering fails authentication.
#[test]
fn session_box_seals_and_authenticates() {
    let alice = RelayIdentity::generate();
    let bob = RelayIdentity::generate();

    let a_box = alice.session(&bob.public_key()).unwrap();
    let b_box = bob.session(&alice.public_key()).unwrap();

    let (sealed, _nonce) = a_box.seal(b"cover me").unwrap();
    assert_eq!(b_box.open(&sealed).unwrap(), b"cover me");

    let mut tampered = sealed.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 1;
    assert!(b_box.open(&tampered).is_err());

    // A third party cannot open the box.
    let eve = RelayIdentity::generate();
    let e_box = eve.session(&bob.public_key()).unwrap();
    assert!(e_box.open(&sealed).is_err());
}

// Replay protection: an accepted id is rejected on re-delivery inside the
// window, and stale timestamps are rejected outright.
#[test]
fn replay_guard_rejects_duplicates_and_stale() {
    let guard = ReplayGuard::new();
    let now = now_ms() as i64;

    assert!(guard.check(b"sender", "msg-1", now, now).is_ok());
    assert_eq!(
        guard.check(b"sender", "msg-1", now, now + 1000),
        Err(ReplayError::Replayed)
    );
    // Same id from a different sender is fine.
    assert!(guard.check(b"other", "msg-1", now, now).is_ok());

    let stale = now - REPLAY_WINDOW_MS - 1;
    assert_eq!(
        guard.check(b"sender", "msg-2", stale, now),
        Err(ReplayError::Stale)
    );
}

#[test]
fn payload_json_roundtrip() {
    let payload = RelayPayload::BlockRequest(BlockRequest {
        block_id: "abc".to_string(),
        relay_path: vec!["hop-1".to_string()],
        options: RequestOptions {
            timeout_ms: 5_000,
            no_cache: true,
        },
        peer_hint: None,
        priority: 1,
        is_decoy: false,
    });
    let json = serde_json::to_vec(&payload).unwrap();
    let parsed: RelayPayload = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed, payload);
    assert_eq!(parsed.message_type(), MessageType::BlockRequest);
}

// Achieved noise ratio is cover/(cover+real) over the sliding window.
#[test]
fn noise_window_tracks_ratio() {
    use noisefs::networking::relay::NoiseWindow;
    let window = NoiseWindow::new(Duration::from_secs(60));
    for _ in 0..7 {
        window.record(false);
    }
    for _ in 0..3 {
        window.record(true);
    }
    let (real, cover) = window.counts();
    assert_eq!((real, cover), (7, 3));
    assert!((window.ratio() - 0.3).abs() < 1e-9);
}

async fn client_over_store(store: Arc<MemoryStore>) -> (RelayClient, Arc<RelayPool>) {
    let identity = RelayIdentity::generate();
    let store_dyn: Arc<dyn BlockStore> = store;
    let transport = Arc::new(StoreRelayTransport::new(store_dyn, identity.public_key()));
    let relay_public = transport.public_key();
    let pool = Arc::new(RelayPool::new(
        RelayPoolConfig {
            max_relays: 4,
            min_relays: 2,
            health_check_interval: Duration::from_secs(30),
            max_relay_age: Duration::from_secs(3600),
            strategy: LoadBalanceStrategy::RoundRobin,
        },
        transport,
        vec!["relay-a".to_string(), "relay-b".to_string()],
    ));
    let client = RelayClient::new(
        &identity,
        &relay_public,
        pool.clone(),
        Duration::from_secs(60),
        1,
    )
    .unwrap();
    (client, pool)
}

// End to end: a block stored behind the relay comes back through the boxed
// protocol, and a missing block answers None.
#[tokio::test]
async fn relay_client_fetches_blocks() {
    let store = Arc::new(MemoryStore::new());
    let block = Block::from_bytes(vec![7u8; 4096]);
    let id = block.id();
    store.put(&block).await.unwrap();

    let (client, pool) = client_over_store(store).await;
    assert_eq!(pool.healthy_count(), 2);

    let fetched = client.request_block(&id, 1, false).await.unwrap();
    assert_eq!(fetched.unwrap().bytes(), vec![7u8; 4096]);

    let missing = noisefs::core::blocks::content_hash(b"absent");
    assert!(client.request_block(&missing, 1, false).await.unwrap().is_none());

    // Both real fetches landed in the noise window.
    let (real, cover) = client.noise_window().counts();
    assert_eq!(real, 2);
    assert_eq!(cover, 0);

    // Decoys count on the cover side.
    let _ = client.request_block(&id, 0, true).await.unwrap();
    let (_, cover) = client.noise_window().counts();
    assert_eq!(cover, 1);
}
