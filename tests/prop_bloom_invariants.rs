// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use noisefs::core::blocks::content_hash;
use noisefs::core::types::BlockId;
use noisefs::networking::bloom::{AvailabilityTracker, BloomError, BloomFilter};
use proptest::prelude::*;

fn id_from(n: u64) -> BlockId {
    content_hash(&n.to_be_bytes())
}

proptest! {
    // No false negatives, ever.
    #[test]
    fn prop_no_false_negatives(items in proptest::collection::vec(any::<u64>(), 1..200)) {
        let mut filter = BloomFilter::with_rate(items.len() * 2, 0.01);
        for n in &items {
            filter.add(&n.to_be_bytes());
        }
        for n in &items {
            prop_assert!(filter.contains(&n.to_be_bytes()));
        }
    }

    // A merged filter contains everything either input contained.
    #[test]
    fn prop_merge_is_union(
        a_items in proptest::collection::vec(any::<u64>(), 1..100),
        b_items in proptest::collection::vec(any::<u64>(), 1..100),
    ) {
        let mut a = BloomFilter::new(4096, 5);
        let mut b = BloomFilter::new(4096, 5);
        for n in &a_items {
            a.add(&n.to_be_bytes());
        }
        for n in &b_items {
            b.add(&n.to_be_bytes());
        }
        let mut merged = a.clone();
        merged.merge(&b).unwrap();
        for n in a_items.iter().chain(&b_items) {
            prop_assert!(merged.contains(&n.to_be_bytes()));
        }
        // Union never loses a positive from either side.
        for n in 0u64..64 {
            let bytes = n.to_be_bytes();
            if a.contains(&bytes) || b.contains(&bytes) {
                prop_assert!(merged.contains(&bytes));
            }
        }
    }

    // Marshal/unmarshal is loss-free.
    #[test]
    fn prop_marshal_roundtrip(items in proptest::collection::vec(any::<u64>(), 0..100)) {
        let mut filter = BloomFilter::with_rate(200, 0.02);
        for n in &items {
            filter.add(&n.to_be_bytes());
        }
        let wire = filter.marshal();
        let parsed = BloomFilter::unmarshal(&wire).unwrap();
        prop_assert_eq!(&filter, &parsed);
    }

    // Truncated wire bytes never panic, always error.
    #[test]
    fn prop_unmarshal_truncation(items in proptest::collection::vec(any::<u64>(), 1..50), cut in 0usize..20) {
        let mut filter = BloomFilter::with_rate(100, 0.01);
        for n in &items {
            filter.add(&n.to_be_bytes());
        }
        let wire = filter.marshal();
        let cut = cut.min(wire.len());
        if cut > 0 {
            prop_assert!(BloomFilter::unmarshal(&wire[..wire.len() - cut]).is_err());
        }
    }
}

// 10000 inserts into a filter sized for n=20000 at p=0.01: zero false
// negatives, and random queries stay under the configured FPR plus
// tolerance.
#[test]
fn sized_filter_has_no_false_negatives() {
    let mut filter = BloomFilter::with_rate(20000, 0.01);
    for n in 0u64..10000 {
        filter.add(id_from(n).as_bytes());
    }
    for n in 0u64..10000 {
        assert!(filter.contains(id_from(n).as_bytes()));
    }
    let false_positives = (10000u64..20000)
        .filter(|n| filter.contains(id_from(*n).as_bytes()))
        .count();
    // Configured 1% plus 20% tolerance over 10000 queries.
    assert!(false_positives <= 120, "false positives: {false_positives}");
}

#[test]
fn merge_requires_matching_parameters() {
    let a = BloomFilter::new(1024, 4);
    let mut b = BloomFilter::new(2048, 4);
    assert_eq!(b.merge(&a), Err(BloomError::Incompatible));
    let mut c = BloomFilter::new(1024, 5);
    assert_eq!(c.merge(&a), Err(BloomError::Incompatible));
}

#[test]
fn tracker_reports_holders() {
    let tracker = AvailabilityTracker::new();
    let blocks: Vec<BlockId> = (0..100).map(id_from).collect();
    tracker.update_inventory(b"peer-a", &blocks[..50]);
    tracker.update_inventory(b"peer-b", &blocks[50..]);

    let holders = tracker.peers_with(&blocks[10]);
    assert!(holders.contains(&b"peer-a".to_vec()));

    assert!(tracker.peer_has_any(b"peer-b", &blocks[50..60]));
    assert_eq!(tracker.len(), 2);

    tracker.remove(b"peer-a");
    assert_eq!(tracker.len(), 1);
}
