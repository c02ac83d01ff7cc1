//! Swap domain: amounts, reconciliation and address checks.

pub mod address;
pub mod amounts;
pub mod reconcile;

pub use address::{decode_settlement_address, scripted_address, verify_settlement_address};
pub use amounts::{bsq_amount_range, change_output, SwapAmounts};
pub use reconcile::{reconcile, SwapBalance};
