// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use noisefs::core::blocks::{content_hash, split_bytes, xor_combine, Block, BlockError};
use proptest::prelude::*;

fn block_from(bytes: Vec<u8>) -> Block {
    Block::from_bytes(bytes)
}

proptest! {
    // xor(b1, .., bn, xor(b1, .., bn)) is all zeroes.
    #[test]
    fn prop_xor_self_inverse(
        seed in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 64), 2..6),
    ) {
        let blocks: Vec<Block> = seed.into_iter().map(block_from).collect();
        let refs: Vec<&Block> = blocks.iter().collect();
        let combined = xor_combine(&refs).unwrap();

        let mut all: Vec<&Block> = blocks.iter().collect();
        all.push(&combined);
        let zero = xor_combine(&all).unwrap();
        prop_assert!(zero.bytes().iter().all(|&b| b == 0));
    }

    // XOR is commutative: any ordering of the same blocks combines equally.
    #[test]
    fn prop_xor_commutative(
        a in proptest::collection::vec(any::<u8>(), 64),
        b in proptest::collection::vec(any::<u8>(), 64),
        c in proptest::collection::vec(any::<u8>(), 64),
    ) {
        let (a, b, c) = (block_from(a), block_from(b), block_from(c));
        let abc = xor_combine(&[&a, &b, &c]).unwrap();
        let cba = xor_combine(&[&c, &b, &a]).unwrap();
        prop_assert_eq!(abc.id(), cba.id());
    }

    // anonymized = plaintext ^ r1 ^ r2 recovers plaintext with the same
    // randomizers.
    #[test]
    fn prop_anonymize_recover(
        plain in proptest::collection::vec(any::<u8>(), 128),
        r1 in proptest::collection::vec(any::<u8>(), 128),
        r2 in proptest::collection::vec(any::<u8>(), 128),
    ) {
        let plain = block_from(plain);
        let r1 = block_from(r1);
        let r2 = block_from(r2);
        let anonymized = xor_combine(&[&plain, &r1, &r2]).unwrap();
        let recovered = xor_combine(&[&anonymized, &r1, &r2]).unwrap();
        prop_assert_eq!(recovered.bytes(), plain.bytes());
    }

    // Splitting re-assembles to the original bytes.
    #[test]
    fn prop_split_reassemble(data in proptest::collection::vec(any::<u8>(), 1..5000)) {
        let split = split_bytes(&data, 1024).unwrap();
        let mut out = Vec::new();
        for sb in &split {
            out.extend_from_slice(&sb.block.bytes()[..sb.len]);
        }
        prop_assert_eq!(out, data);
    }
}

#[test]
fn xor_rejects_size_mismatch() {
    let a = Block::from_bytes(vec![0u8; 32]);
    let b = Block::from_bytes(vec![0u8; 64]);
    assert_eq!(xor_combine(&[&a, &b]), Err(BlockError::SizeMismatch));
}

#[test]
fn xor_rejects_single_input() {
    let a = Block::from_bytes(vec![1u8; 32]);
    assert_eq!(xor_combine(&[&a]), Err(BlockError::TooFewInputs));
}

#[test]
fn content_hash_is_stable() {
    let a = content_hash(b"noise");
    let b = content_hash(b"noise");
    assert_eq!(a, b);
    assert_ne!(a, content_hash(b"noise2"));
}

#[test]
fn padded_records_true_length() {
    let (block, len) = Block::padded(vec![7u8; 100], 1024).unwrap();
    assert_eq!(len, 100);
    assert_eq!(block.len(), 1024);
    assert!(block.bytes()[100..].iter().all(|&b| b == 0));
}
