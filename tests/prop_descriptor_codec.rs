// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use noisefs::core::descriptors::{
    Descriptor, DescriptorEntry, DescriptorError, MixingSummary, ReuseProof,
};
use noisefs::core::types::BlockId;
use proptest::prelude::*;

fn arb_id() -> impl Strategy<Value = BlockId> {
    any::<[u8; 32]>().prop_map(BlockId::from_bytes)
}

fn arb_entry() -> impl Strategy<Value = DescriptorEntry> {
    (
        arb_id(),
        proptest::collection::vec(arb_id(), 1..4),
        proptest::collection::vec(arb_id(), 0..3),
        1u32..=1024,
    )
        .prop_map(|(anonymized_id, randomizer_ids, public_domain_ids, len)| DescriptorEntry {
            anonymized_id,
            randomizer_ids,
            public_domain_ids,
            len,
        })
}

fn arb_descriptor() -> impl Strategy<Value = Descriptor> {
    (
        proptest::collection::vec(arb_entry(), 0..8),
        any::<u32>(),
        any::<u32>(),
        any::<u64>(),
    )
        .prop_map(|(entries, reused, fresh, created_at_ms)| {
            let file_size: u64 = entries.iter().map(|e| e.len as u64).sum();
            let public_domain_entries =
                entries.iter().filter(|e| !e.public_domain_ids.is_empty()).count() as u32;
            Descriptor {
                file_size,
                block_size: 1024,
                entries,
                reuse_proof: ReuseProof {
                    reused,
                    fresh,
                    public_domain: public_domain_entries,
                    reuse_ratio_milli: 500,
                    public_domain_ratio_milli: 300,
                    certified_at_ms: created_at_ms,
                },
                mixing: MixingSummary {
                    min_randomizers: 2,
                    public_domain_entries,
                },
                created_at_ms,
            }
        })
}

proptest! {
    // encode/decode is bit-exact and loss-free.
    #[test]
    fn prop_codec_roundtrip(descriptor in arb_descriptor()) {
        let wire = descriptor.encode();
        let parsed = Descriptor::decode(&wire).unwrap();
        prop_assert_eq!(&descriptor, &parsed);
        // Encoding is deterministic for an identical descriptor body.
        prop_assert_eq!(wire, parsed.encode());
    }

    // Any truncation errors out without panicking.
    #[test]
    fn prop_decode_truncation(descriptor in arb_descriptor(), cut in 1usize..64) {
        let wire = descriptor.encode();
        let cut = cut.min(wire.len());
        prop_assert!(Descriptor::decode(&wire[..wire.len() - cut]).is_err());
    }

    // Arbitrary bytes never panic the parser.
    #[test]
    fn prop_decode_garbage(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = Descriptor::decode(&bytes);
    }
}

fn one_entry_descriptor() -> Descriptor {
    Descriptor {
        file_size: 100,
        block_size: 1024,
        entries: vec![DescriptorEntry {
            anonymized_id: BlockId::from_bytes([1u8; 32]),
            randomizer_ids: vec![BlockId::from_bytes([2u8; 32])],
            public_domain_ids: Vec::new(),
            len: 100,
        }],
        reuse_proof: ReuseProof::default(),
        mixing: MixingSummary::default(),
        created_at_ms: 7,
    }
}

#[test]
fn rejects_empty_randomizer_list() {
    let mut d = one_entry_descriptor();
    d.entries[0].randomizer_ids.clear();
    assert_eq!(
        d.validate(),
        Err(DescriptorError::Malformed("empty randomizer list"))
    );
}

#[test]
fn rejects_length_sum_mismatch() {
    let mut d = one_entry_descriptor();
    d.file_size = 99;
    assert_eq!(d.validate(), Err(DescriptorError::Malformed("length sum")));
}

#[test]
fn rejects_bad_block_size() {
    let mut d = one_entry_descriptor();
    d.block_size = 1000;
    assert_eq!(d.validate(), Err(DescriptorError::Malformed("block size")));
}

#[test]
fn rejects_wrong_version() {
    let mut wire = one_entry_descriptor().encode();
    wire[0] = 9;
    assert_eq!(Descriptor::decode(&wire), Err(DescriptorError::Version));
}

#[test]
fn rejects_trailing_bytes() {
    let mut wire = one_entry_descriptor().encode();
    wire.push(0);
    assert_eq!(Descriptor::decode(&wire), Err(DescriptorError::Trailing));
}
