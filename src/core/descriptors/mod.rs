#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! File descriptors: canonical wire format, optional encryption, persistence.

mod descriptor;
mod store;

pub use descriptor::{
    Descriptor, DescriptorEntry, DescriptorError, MixingSummary, ReuseProof, DESCRIPTOR_VERSION,
};
pub use store::{DescriptorCrypto, DescriptorStore, DescriptorStoreError};
