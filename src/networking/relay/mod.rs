#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Privacy relay layer: boxed message protocol, health-tracked pool, client.

mod client;
mod crypto;
mod pool;
mod protocol;

pub use client::{NoiseWindow, RelayClient};
pub use crypto::{RelayCryptoError, RelayIdentity, SessionBox};
pub use pool::{
    spawn_relay_health, LoadBalanceStrategy, RelayError, RelayInfo, RelayPool, RelayPoolConfig,
    RelayTransport, StoreRelayTransport,
};
pub use protocol::{
    BlockRequest, BlockResponse, CoverRequest, EnvelopeError, ErrorPayload, HealthCheck,
    MessageType, RelayEnvelope, RelayPayload, ReplayError, ReplayGuard, RequestOptions,
    RELAY_PROTO_VERSION, REPLAY_WINDOW_MS,
};
