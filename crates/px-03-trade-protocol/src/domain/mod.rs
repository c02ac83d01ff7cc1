//! Domain layer for the trade protocol

pub mod contract;
pub mod model;
pub mod send_states;

pub use contract::{
    build_contract, build_deposit_tx, build_payout_tx, change_for, deposit_outpoint,
    multisig_address, payout_amounts,
};
pub use model::{non_empty, required, ProcessModel, ProtocolServices, SwapTerms, TradingPeer};
pub use send_states::{PendingSend, SendStates};
