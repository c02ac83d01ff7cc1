//! # Shared Types Crate
//!
//! Domain entities, the network envelope with its message catalogue, the
//! protocol error taxonomy and the ports of the external collaborators.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type crossing a subsystem boundary is
//!   defined here.
//! - **Envelope Integrity**: all peer messages travel in a `NetworkEnvelope`
//!   whose `uid` drives acknowledgement and de-duplication.
//! - **Capabilities as Ports**: wallet, ledger, message bus and persistence
//!   are traits; the protocol engine never depends on their implementations.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod contract;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod messages;
pub mod ports;
pub mod trade;
pub mod transaction;

pub use contract::Contract;
pub use entities::*;
pub use envelope::{now_secs, NetworkEnvelope};
pub use errors::*;
pub use messages::*;
pub use trade::*;
pub use transaction::*;
