//! # Peer Exchange Test Suite
//!
//! End-to-end scenarios: complete nodes on one loopback network and one
//! simulated chain, with a scripted dispute agent endpoint.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Node/agent setup, polling helpers
//! └── integration/
//!     ├── escrow_flow.rs     # Take offer through payout
//!     ├── network_faults.rs  # Send retries, mailbox delivery
//!     ├── bsq_swap_flow.rs   # Atomic BSQ/BTC swap
//!     └── dispute_flow.rs    # Refund dispute with out-of-order result
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p px-tests
//! cargo test -p px-tests integration::dispute_flow::
//! ```
//!
//! Every scenario runs on a paused tokio clock, so protocol timeouts and
//! ledger polls advance in virtual time.

pub mod harness;
pub mod integration;
