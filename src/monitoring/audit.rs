// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Compliance audit contract.
//!
//! Audit persistence is an external collaborator; the core only emits
//! events through this narrow sink, injected so tests can substitute it.

use std::sync::Mutex;

use crate::core::types::CanonicalMap;
use tracing::info;

/// One audit event.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    /// Event class, e.g. "upload", "download".
    pub event_type: String,
    /// Acting component.
    pub subject: String,
    /// Acted-on object (never a raw block id).
    pub object: String,
    /// Outcome label, e.g. "ok", "insufficient_randomizers".
    pub outcome: String,
    /// Free-form metadata.
    pub metadata: CanonicalMap<String, String>,
}

/// Audit sink contract.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn log_event(&self, event: AuditEvent);
}

/// Default sink: structured log lines under the `audit` target.
#[derive(Clone, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn log_event(&self, event: AuditEvent) {
        info!(
            target: "audit",
            event_type = %event.event_type,
            subject = %event.subject,
            object = %event.object,
            outcome = %event.outcome,
            meta = ?event.metadata,
            "audit event"
        );
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events captured so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAudit {
    fn log_event(&self, event: AuditEvent) {
        if let Ok(mut g) = self.events.lock() {
            g.push(event);
        }
    }
}
