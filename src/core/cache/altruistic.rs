// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Capacity arbitration between personal and altruistic cache entries.
//!
//! Personal capacity is reserved indirectly: altruistic entries are evicted
//! first whenever total capacity is tight, and altruistic puts are admitted
//! only into the byte budget left above the personal floor. After an
//! altruistic eviction wave, new altruistic puts are refused for
//! `eviction_cooldown` to avoid thrash.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::adaptive::{AdaptiveCache, CacheClass, CacheStats, PutReport};
use crate::core::types::{now_ms, BlockId};

/// Wrapper configuration.
#[derive(Clone, Debug)]
pub struct AltruisticConfig {
    /// Bytes the personal cache may always grow into.
    pub min_personal_cache_bytes: u64,
    /// Master switch; off means altruistic puts are always refused.
    pub enable_altruistic: bool,
    /// Quiet period after an altruistic eviction wave.
    pub eviction_cooldown: Duration,
}

impl Default for AltruisticConfig {
    fn default() -> Self {
        Self {
            min_personal_cache_bytes: 256 * 1024 * 1024,
            enable_altruistic: true,
            eviction_cooldown: Duration::from_secs(30),
        }
    }
}

/// Altruistic-aware cache front.
pub struct AltruisticCache {
    cache: Arc<AdaptiveCache>,
    cfg: AltruisticConfig,
    cooldown_until_ms: AtomicU64,
}

impl AltruisticCache {
    /// Wrap `cache`.
    pub fn new(cache: Arc<AdaptiveCache>, cfg: AltruisticConfig) -> Self {
        Self {
            cache,
            cfg,
            cooldown_until_ms: AtomicU64::new(0),
        }
    }

    /// Underlying tiered cache.
    pub fn inner(&self) -> &Arc<AdaptiveCache> {
        &self.cache
    }

    /// Lookup.
    pub fn get(&self, id: &BlockId) -> Option<Vec<u8>> {
        self.cache.get(id)
    }

    /// Presence test.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.cache.contains(id)
    }

    /// Drop everything and clear the cooldown.
    pub fn clear(&self) {
        self.cache.clear();
        self.cooldown_until_ms.store(0, Ordering::Relaxed);
    }

    /// Aggregate counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Insert a personal entry. Altruistic entries are evicted before any
    /// personal entry has to go; an altruistic eviction wave arms the
    /// cooldown.
    pub fn put_personal(&self, id: BlockId, bytes: Vec<u8>) -> PutReport {
        self.put_personal_at(id, bytes, now_ms())
    }

    /// Insert a personal entry at an explicit clock.
    pub fn put_personal_at(&self, id: BlockId, bytes: Vec<u8>, now: u64) -> PutReport {
        let report = self.cache.put_at(id, bytes, CacheClass::Personal, now);
        if report.evicted_altruistic > 0 {
            self.arm_cooldown(now);
        }
        report
    }

    /// Offer an altruistic entry. Returns whether it was accepted.
    pub fn put_altruistic(&self, id: BlockId, bytes: Vec<u8>) -> bool {
        self.put_altruistic_at(id, bytes, now_ms())
    }

    /// Offer an altruistic entry at an explicit clock.
    pub fn put_altruistic_at(&self, id: BlockId, bytes: Vec<u8>, now: u64) -> bool {
        if !self.cfg.enable_altruistic {
            return false;
        }
        if now < self.cooldown_until_ms.load(Ordering::Relaxed) {
            return false;
        }
        let capacity = self.cache.config().max_bytes;
        let budget = capacity.saturating_sub(self.cfg.min_personal_cache_bytes);
        let len = bytes.len() as u64;
        if len > budget {
            return false;
        }
        // Make room inside the altruistic budget before inserting, so the
        // insertion itself never displaces a personal entry.
        let stats = self.cache.stats();
        if stats.altruistic_bytes + len > budget {
            let evicted = self.cache.shrink_altruistic_to(budget.saturating_sub(len));
            if evicted > 0 {
                self.arm_cooldown(now);
            }
        }
        let report = self.cache.put_at(id, bytes, CacheClass::Altruistic, now);
        if report.evicted_altruistic > 0 {
            self.arm_cooldown(now);
        }
        true
    }

    fn arm_cooldown(&self, now: u64) {
        let until = now + self.cfg.eviction_cooldown.as_millis() as u64;
        self.cooldown_until_ms.store(until, Ordering::Relaxed);
        debug!(until, "altruistic cooldown armed");
    }
}
