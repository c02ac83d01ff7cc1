//! Cross-crate scenarios driven through `ExchangeNode`.

pub mod bsq_swap_flow;
pub mod dispute_flow;
pub mod escrow_flow;
pub mod network_faults;
