//! # px-04-bsq-swap
//!
//! Atomic BSQ Swap: BTC and BSQ change hands in one transaction that both
//! parties sign. The maker builds it from both parties' inputs and
//! outputs; each side independently checks value conservation before it
//! signs.
//!
//! ## Reconciliation
//!
//! ```text
//! bsq_in - bsq_out == bsq_trade_fee          (the burnt fee)
//! btc_in = btc inputs + bsq_trade_fee
//! btc_in - btc_out >= 0                      (left to the miners)
//! ```
//!
//! ## Settlement address
//!
//! The taker's receive address must decode for the configured network.
//! A `B` prefix marks a BSQ address. Testnet, signet and regtest accept
//! each other's addresses.
//!
//! The flow runs on the per-trade protocol actor of `px-03-trade-protocol`.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod domain;
pub mod flow;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{FeeSchedule, SwapConfig};
pub use domain::{
    decode_settlement_address, reconcile, scripted_address, verify_settlement_address,
    SwapAmounts, SwapBalance,
};
pub use flow::BsqSwapFlow;
