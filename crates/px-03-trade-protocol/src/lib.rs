//! # px-03-trade-protocol
//!
//! Per-trade protocol engine and the escrow trade protocol.
//!
//! ## Architecture
//!
//! ```text
//!  TradeHandle ──TradeCommand──→ ProtocolActor (one per trade)
//!                                    │
//!                                    ├─ ProtocolFlow::on_* ──→ Plan (task list)
//!                                    ├─ TaskRunner over the ProcessModel
//!                                    ├─ protocol timeout (60 s)
//!                                    └─ ledger poll (deposit confirmation, reorg reset)
//! ```
//!
//! The actor is the only writer of its trade. Precondition failures
//! (wrong phase or role) reject the trigger without touching the trade;
//! task failures record the error on the trade, nack the message and,
//! for protocol violations, request dispute escalation.
//!
//! `EscrowFlow` implements the two-party escrow protocol. The BSQ swap
//! protocol plugs its own flow into the same actor.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod actor;
pub mod config;
pub mod domain;
pub mod escrow;
pub mod flow;
pub mod send;
pub mod tasks;

pub use actor::{spawn_protocol, TradeCommand, TradeHandle};
pub use config::ProtocolConfig;
pub use domain::{PendingSend, ProcessModel, ProtocolServices, SendStates, SwapTerms, TradingPeer};
pub use escrow::EscrowFlow;
pub use flow::{Condition, Plan, ProtocolFlow, ProtocolTask, TimeoutDirective, TradeAction};
pub use send::{send_direct_message, send_mailbox_message, ResendPendingMessage};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
