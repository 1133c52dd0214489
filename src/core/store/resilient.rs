// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Retry + timeout wrapper around a block store.
//!
//! Only `Unavailable` is retried (exponential backoff, base 200 ms, factor 2,
//! cap 5 s). `NotFound` surfaces immediately; `Integrity` is fatal for the
//! address and never retried on the same backend.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{BlockStore, StoreError};
use crate::core::blocks::Block;
use crate::core::types::{BlockAddress, StoreBackend};

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Retry policy for transient store failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts beyond the first call.
    pub attempts: u32,
    /// Per-call deadline.
    pub op_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            op_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(ms.min(BACKOFF_CAP_MS))
    }
}

/// Store wrapper applying [`RetryPolicy`] to every operation.
pub struct ResilientStore {
    inner: Arc<dyn BlockStore>,
    policy: RetryPolicy,
}

impl ResilientStore {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn BlockStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            let failure = match tokio::time::timeout(self.policy.op_timeout, op()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(StoreError::Unavailable)) => StoreError::Unavailable,
                Ok(Err(e)) => return Err(e),
                Err(_) => StoreError::Timeout,
            };
            if attempt >= self.policy.attempts {
                return Err(failure);
            }
            let delay = self.policy.backoff(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "store retry");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl BlockStore for ResilientStore {
    async fn put(&self, block: &Block) -> Result<BlockAddress, StoreError> {
        self.run(|| self.inner.put(block)).await
    }

    async fn get(&self, addr: &BlockAddress) -> Result<Block, StoreError> {
        self.run(|| self.inner.get(addr)).await
    }

    async fn has(&self, addr: &BlockAddress) -> Result<bool, StoreError> {
        self.run(|| self.inner.has(addr)).await
    }

    async fn pin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        self.run(|| self.inner.pin(addr)).await
    }

    async fn unpin(&self, addr: &BlockAddress) -> Result<(), StoreError> {
        self.run(|| self.inner.unpin(addr)).await
    }

    fn backend(&self) -> StoreBackend {
        self.inner.backend()
    }
}
