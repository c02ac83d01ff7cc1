//! # Node Runtime Library
//!
//! Wires the exchange subsystems into a running node. The binary in
//! `main.rs` starts one node; tests start several on one loopback network.
//!
//! - `adapters/` - in-memory network, wallet, ledger, persistence, metrics
//! - `container/` - configuration and node wiring
//! - `handlers/` - inbound message routing
//! - `managers/` - open offers and trade actors

#![allow(clippy::too_many_lines)]

pub mod adapters;
pub mod container;
pub mod error;
pub mod handlers;
pub mod managers;

pub use container::config;
pub use container::{Environment, ExchangeNode, NodeConfig};
pub use error::NodeError;
