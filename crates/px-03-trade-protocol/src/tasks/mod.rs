//! Escrow protocol tasks, grouped by the party that runs them.

/// Clone the payload of the triggering message, or fail if the trigger is
/// a different message or belongs to another trade.
#[macro_export]
macro_rules! trigger_payload {
    ($model:expr, $variant:ident) => {{
        let message = match $model.trigger_message()? {
            shared_types::ExchangeMessage::$variant(m) => m.clone(),
            other => {
                return Err(shared_types::ProtocolError::Violation(format!(
                    "expected {} but got {}",
                    stringify!($variant),
                    other.name()
                )))
            }
        };
        if message.trade_id != $model.trade.id {
            return Err(shared_types::ProtocolError::Violation(format!(
                "message for trade {} routed to trade {}",
                message.trade_id, $model.trade.id
            )));
        }
        message
    }};
}

pub mod buyer;
pub mod common;
pub mod maker;
pub mod seller;
pub mod taker;

pub use buyer::{BuyerProcessPayoutTxPublished, BuyerSignPayoutTx, SendFiatTransferStarted};
pub use common::{CheckDepositConfirmation, PrepareDepositInputs, VerifyPeerInputs, VerifyTakerFeeTx};
pub use maker::{
    MakerCreateDepositTx, MakerProcessDepositTxPublished, MakerProcessDepositTxRequest,
    MakerSignContract, SendInputsForDepositTxResponse,
};
pub use seller::{
    SellerConfirmPaymentReceipt, SellerProcessFiatTransferStarted, SellerPublishPayoutTx,
    SendPayoutTxPublished,
};
pub use taker::{
    CreateTakerFeeTx, SendDepositTxPublished, SendInputsForDepositTxRequest,
    TakerProcessDepositTxResponse, TakerPublishDepositTx, TakerVerifyContract,
    TakerVerifyDepositTx, TakerVerifyTradeAmount,
};
