// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use noisefs::core::config::NoiseConfig;

#[test]
fn defaults_validate() {
    NoiseConfig::default().validate().expect("defaults");
}

#[test]
fn missing_sections_take_defaults() {
    let cfg: NoiseConfig = toml::from_str(
        r#"
        [node]
        name = "n1"
        data_dir = "/tmp/n1"
        "#,
    )
    .unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.performance.block_size, 128 * 1024);
    assert_eq!(cfg.reuse.min_reuse_count, 2);
    assert!((cfg.mixing.noise_ratio - 0.3).abs() < f64::EPSILON);
}

#[test]
fn rejects_non_power_of_two_block_size() {
    let mut cfg = NoiseConfig::default();
    cfg.performance.block_size = 100_000;
    assert!(cfg.validate().is_err());
    cfg.performance.block_size = 512;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_personal_floor_above_memory_limit() {
    let mut cfg = NoiseConfig::default();
    cfg.cache.memory_limit_mb = 100;
    cfg.cache.min_personal_cache_mb = 200;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_inverted_relay_bounds() {
    let mut cfg = NoiseConfig::default();
    cfg.relay.min_relays = 9;
    cfg.relay.max_relays = 4;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_unknown_balance_strategy() {
    let mut cfg = NoiseConfig::default();
    cfg.relay.load_balance_strategy = "fastest".to_string();
    assert!(cfg.validate().is_err());
}

// enable_encryption=false forces every other encryption flag off.
#[test]
fn master_switch_gates_encryption_flags() {
    let mut cfg = NoiseConfig::default();
    cfg.security.enable_encryption = false;
    assert!(cfg.validate().is_err(), "encrypt_descriptors left on");

    cfg.security.encrypt_descriptors = false;
    cfg.security.default_encrypted = false;
    cfg.security.require_password = false;
    cfg.security.password_prompt = false;
    cfg.security.encrypt_local_index = false;
    cfg.validate().unwrap();
}

#[test]
fn rejects_inverted_mix_bounds() {
    let mut cfg = NoiseConfig::default();
    cfg.mixing.min_mix_size = 20;
    cfg.mixing.max_mix_size = 10;
    assert!(cfg.validate().is_err());

    let mut cfg = NoiseConfig::default();
    cfg.mixing.min_cover_requests = 9;
    cfg.mixing.max_cover_requests = 2;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_concurrency_outside_bounds() {
    let mut cfg = NoiseConfig::default();
    cfg.performance.max_concurrent_ops = 0;
    assert!(cfg.validate().is_err());
    cfg.performance.max_concurrent_ops = 101;
    assert!(cfg.validate().is_err());
    cfg.performance.max_concurrent_ops = 100;
    cfg.validate().unwrap();
}
