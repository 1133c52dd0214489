#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Upload/download pipeline and the system coordinator.

mod coordinator;
mod pipeline;

pub use coordinator::{Coordinator, UploadReceipt};
pub use pipeline::AnonymizationClient;
