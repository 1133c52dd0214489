// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use noisefs::core::blocks::content_hash;
use noisefs::core::cache::{
    AdaptiveCache, AdaptiveCacheConfig, AltruisticCache, AltruisticConfig, CacheClass, CacheTier,
};
use noisefs::core::types::BlockId;

const MIB: u64 = 1024 * 1024;

fn id(n: u32) -> BlockId {
    content_hash(&n.to_be_bytes())
}

fn mib_value() -> Vec<u8> {
    vec![0xAB; MIB as usize]
}

fn cache(max_bytes: u64) -> AdaptiveCache {
    AdaptiveCache::new(AdaptiveCacheConfig {
        max_bytes,
        max_items: 10_000,
        eviction_batch: 4,
        ..AdaptiveCacheConfig::default()
    })
}

// Capacity holds after any sequence of puts.
#[test]
fn capacity_never_exceeded() {
    let c = cache(10 * MIB);
    for n in 0..64 {
        c.put_at(id(n), mib_value(), CacheClass::Personal, 1000 + n as u64);
        assert!(c.stats().total_bytes <= 10 * MIB);
    }
    assert!(c.stats().items <= 10);
}

// Puts land in the warm tier; hits keep entries resident.
#[test]
fn put_defaults_to_warm() {
    let c = cache(10 * MIB);
    c.put_at(id(1), vec![1, 2, 3], CacheClass::Personal, 1000);
    assert_eq!(c.tier_of(&id(1)), Some(CacheTier::Warm));
    assert_eq!(c.get_at(&id(1), 1001), Some(vec![1, 2, 3]));
    assert!(c.contains(&id(1)));
    c.clear();
    assert!(!c.contains(&id(1)));
}

// Frequently-accessed keys are promoted to hot by the exchange cycle;
// idle warm entries sink to cold.
#[test]
fn exchange_promotes_and_demotes() {
    let c = AdaptiveCache::new(AdaptiveCacheConfig {
        max_bytes: 10 * MIB,
        max_items: 100,
        hot_ratio: 0.2,
        warm_ratio: 0.2,
        prediction_window: Duration::from_secs(300),
        promote_threshold: 3,
        ..AdaptiveCacheConfig::default()
    });

    let mut now = 10_000u64;
    for n in 0..10 {
        c.put_at(id(n), mib_value(), CacheClass::Personal, now);
    }
    // Hammer one key past the promote threshold.
    for _ in 0..5 {
        now += 1_000;
        let _ = c.get_at(&id(0), now);
    }
    c.run_prediction(now);
    c.run_exchange(now);

    assert_eq!(c.tier_of(&id(0)), Some(CacheTier::Hot));
    // Warm capacity is 2 MiB; the overflow sank to cold.
    assert!((0..10).any(|n| c.tier_of(&id(n)) == Some(CacheTier::Cold)));
}

// Eviction drains cold before touching warm entries.
#[test]
fn eviction_prefers_cold() {
    let c = AdaptiveCache::new(AdaptiveCacheConfig {
        max_bytes: 6 * MIB,
        max_items: 100,
        hot_ratio: 0.2,
        warm_ratio: 0.5,
        eviction_batch: 1,
        ..AdaptiveCacheConfig::default()
    });
    let mut now = 10_000u64;
    for n in 0..5 {
        c.put_at(id(n), mib_value(), CacheClass::Personal, now);
        now += 10;
    }
    // Sink the three oldest to cold.
    c.run_prediction(now);
    c.run_exchange(now);
    let cold_before: Vec<u32> = (0..5)
        .filter(|n| c.tier_of(&id(*n)) == Some(CacheTier::Cold))
        .collect();
    assert!(!cold_before.is_empty());

    // Two more puts force eviction; warm survivors stay.
    c.put_at(id(100), mib_value(), CacheClass::Personal, now + 20);
    c.put_at(id(101), mib_value(), CacheClass::Personal, now + 30);
    assert!(c.stats().total_bytes <= 6 * MIB);
    let evicted_cold = cold_before
        .iter()
        .filter(|n| !c.contains(&id(**n)))
        .count();
    assert!(evicted_cold > 0, "cold entries were not evicted first");
}

// S3: 10 MiB capacity, 6 MiB personal floor. 8 MiB personal, then
// altruistic churn, then 1 MiB more personal: only altruistic entries go,
// personal ends at 9 MiB.
#[test]
fn altruistic_evicted_before_personal() {
    let inner = Arc::new(cache(10 * MIB));
    let c = AltruisticCache::new(
        inner,
        AltruisticConfig {
            min_personal_cache_bytes: 6 * MIB,
            enable_altruistic: true,
            eviction_cooldown: Duration::from_millis(0),
        },
    );

    let mut now = 50_000u64;
    for n in 0..8 {
        c.put_personal_at(id(n), mib_value(), now);
        now += 10;
    }
    assert_eq!(c.stats().personal_bytes, 8 * MIB);

    for n in 100..105 {
        c.put_altruistic_at(id(n), mib_value(), now);
        now += 10;
    }
    // Altruistic puts never displaced personal bytes.
    assert_eq!(c.stats().personal_bytes, 8 * MIB);
    assert!(c.stats().total_bytes <= 10 * MIB);

    c.put_personal_at(id(200), mib_value(), now);
    let stats = c.stats();
    assert_eq!(stats.personal_bytes, 9 * MIB, "personal bytes lost");
    assert!(stats.total_bytes <= 10 * MIB);
    for n in 0..8 {
        assert!(c.contains(&id(n)), "personal entry evicted");
    }
}

// After an altruistic eviction wave, altruistic puts are refused for the
// cooldown period.
#[test]
fn cooldown_rejects_altruistic_readmission() {
    let inner = Arc::new(cache(4 * MIB));
    let c = AltruisticCache::new(
        inner,
        AltruisticConfig {
            min_personal_cache_bytes: 2 * MIB,
            enable_altruistic: true,
            eviction_cooldown: Duration::from_secs(30),
        },
    );

    let now = 80_000u64;
    assert!(c.put_altruistic_at(id(1), mib_value(), now));
    assert!(c.put_altruistic_at(id(2), mib_value(), now + 10));
    // Budget is 2 MiB; this forces an altruistic eviction and arms the
    // cooldown.
    assert!(c.put_altruistic_at(id(3), mib_value(), now + 20));
    // Inside the cooldown window: refused.
    assert!(!c.put_altruistic_at(id(4), mib_value(), now + 25));
    // After the window: accepted again.
    assert!(c.put_altruistic_at(id(4), mib_value(), now + 31_000));
}

#[test]
fn disabled_altruistic_refuses_puts() {
    let inner = Arc::new(cache(4 * MIB));
    let c = AltruisticCache::new(
        inner,
        AltruisticConfig {
            min_personal_cache_bytes: MIB,
            enable_altruistic: false,
            eviction_cooldown: Duration::from_secs(1),
        },
    );
    assert!(!c.put_altruistic_at(id(1), mib_value(), 1000));
    assert!(!c.contains(&id(1)));
}
