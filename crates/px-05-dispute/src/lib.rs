//! # px-05-dispute
//!
//! Dispute and refund escalation for trades the protocol could not finish.
//!
//! ```text
//! NoDispute ──→ Requested(type) ──────┐
//!     │                               ├──→ Closed(type)
//!     └──────→ StartedByPeer(type) ───┘
//!
//! Closed(Mediation) ──→ Requested(Refund) | StartedByPeer(Refund)
//! ```
//!
//! - At most two disputes per trade; a third, or one reusing another
//!   trade's deposit or delayed payout tx id, is rejected as a replay.
//! - Chat lines are stored once per uid.
//! - A result that arrives before its dispute is retried after a delay,
//!   a bounded number of times.
//! - Applying a result twice changes nothing; the second copy is only acked.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use config::DisputeConfig;
pub use domain::{Dispute, DisputeRegistry};
pub use error::DisputeError;
pub use ports::{MockOpenOffers, MockTradeRegistry, OpenOfferRegistry, TradeRegistry};
pub use service::{DisputeManager, ResultOutcome};
