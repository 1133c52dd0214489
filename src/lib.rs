// Copyright (c) 2026 NoiseFS
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! NoiseFS - privacy-preserving distributed storage layer.
//!
//! This crate provides:
//! - Block anonymization: fixed-size splitting, XOR with reused randomizers,
//!   descriptor assembly with a stable wire format
//! - A universal randomizer pool with reuse enforcement and public-domain
//!   mixing, plus popularity tracking
//! - An adaptive three-tier block cache with altruistic capacity arbitration
//! - A privacy relay layer: boxed message protocol, health-tracked relay
//!   pool, cover traffic and a batching request mixer
//! - Peer management over bloom-filter inventory summaries gossiped via
//!   libp2p
//! - Monitoring via Prometheus metrics and structured logging

/// Upload/download pipeline and system coordinator.
pub mod client;
/// Core protocol primitives (blocks, stores, descriptors, cache, pool).
pub mod core;
/// Observability (metrics, compliance audit contract).
pub mod monitoring;
/// Networking stack (gossip, peers, relays, cover traffic, mixing).
pub mod networking;
