#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Observability: Prometheus metrics and the compliance audit contract.

pub mod audit;
pub mod metrics;
