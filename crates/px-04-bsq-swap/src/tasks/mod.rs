//! BSQ swap tasks, grouped by the party that runs them.

pub mod common;
pub mod maker;
pub mod taker;

pub use common::{CheckSwapTxOnLedger, CompleteSwap, PrepareSwapInputs, ReconcileSwapTx};
pub use maker::{
    MakerCreateSwapTx, MakerProcessCreateSwapTxRequest, MakerProcessSwapTxPublished,
    MakerSignSwapTx, SendCreateSwapTxResponse, VerifySettlementAddress,
};
pub use taker::{
    SendCreateSwapTxRequest, SendSwapTxPublished, TakerProcessCreateSwapTxResponse,
    TakerSignAndPublishSwapTx, TakerVerifySwapTerms,
};
