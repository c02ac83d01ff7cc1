//! Dispute records and the registry holding them.

pub mod dispute;
pub mod registry;

pub use dispute::Dispute;
pub use registry::{DisputeRegistry, MAX_DISPUTES_PER_TRADE};
