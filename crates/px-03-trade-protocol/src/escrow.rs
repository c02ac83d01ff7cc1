//! # Escrow Flow
//!
//! ```text
//! Taker                                    Maker
//!   TakeOffer
//!   fee tx, inputs ──InputsForDepositTxRequest──→ verify fee + inputs
//!                                                 contract, deposit, sign
//!   verify contract ←─InputsForDepositTxResponse── (mailbox)
//!   sign, publish
//!   deposit ────────DepositTxPublished──────────→ verify signature
//!            ... ledger confirms the deposit ...
//! Buyer                                    Seller
//!   ConfirmPaymentStarted
//!   sign payout ────FiatTransferStarted─────────→ record signature
//!                                                 ConfirmPaymentReceived
//!                 ←─PayoutTxPublished──────────── sign, publish payout
//! ```

use crate::flow::{Condition, Plan, ProtocolFlow, TradeAction};
use crate::send::ResendPendingMessage;
use crate::tasks::{
    BuyerProcessPayoutTxPublished, BuyerSignPayoutTx, CheckDepositConfirmation, CreateTakerFeeTx,
    MakerCreateDepositTx, MakerProcessDepositTxPublished, MakerProcessDepositTxRequest,
    MakerSignContract, PrepareDepositInputs, SellerConfirmPaymentReceipt,
    SellerProcessFiatTransferStarted, SellerPublishPayoutTx, SendDepositTxPublished,
    SendFiatTransferStarted, SendInputsForDepositTxRequest, SendInputsForDepositTxResponse,
    SendPayoutTxPublished, TakerProcessDepositTxResponse, TakerPublishDepositTx,
    TakerVerifyContract, TakerVerifyDepositTx, TakerVerifyTradeAmount, VerifyPeerInputs,
    VerifyTakerFeeTx,
};
use shared_types::{ExchangeMessage, ProtocolError, ProtocolKind, Trade, TradePhase};

/// Two-party escrow with a multisig deposit.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscrowFlow;

impl ProtocolFlow for EscrowFlow {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Escrow
    }

    fn on_action(&self, trade: &Trade, action: TradeAction) -> Result<Plan, ProtocolError> {
        let name = action.name();
        match action {
            TradeAction::TakeOffer => {
                Condition::new(trade, name).phase(TradePhase::Init).taker().check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(TakerVerifyTradeAmount),
                        Box::new(CreateTakerFeeTx),
                        Box::new(PrepareDepositInputs),
                        Box::new(SendInputsForDepositTxRequest),
                    ],
                )
                .start_timeout())
            }
            TradeAction::ConfirmPaymentStarted => {
                Condition::new(trade, name)
                    .phase(TradePhase::DepositConfirmed)
                    .buyer()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![Box::new(BuyerSignPayoutTx), Box::new(SendFiatTransferStarted)],
                ))
            }
            TradeAction::ConfirmPaymentReceived => {
                Condition::new(trade, name).phase(TradePhase::FiatSent).seller().check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(SellerConfirmPaymentReceipt),
                        Box::new(SellerPublishPayoutTx),
                        Box::new(SendPayoutTxPublished),
                    ],
                ))
            }
            TradeAction::RetryFailedSend => {
                if !trade.state.is_send_failed() {
                    return Err(ProtocolError::UnexpectedTrigger {
                        trigger: name.to_string(),
                        phase: trade.phase(),
                    });
                }
                Ok(Plan::new(name, vec![Box::new(ResendPendingMessage)]))
            }
        }
    }

    fn on_message(&self, trade: &Trade, message: &ExchangeMessage) -> Result<Plan, ProtocolError> {
        let name = message.name();
        match message {
            ExchangeMessage::InputsForDepositTxRequest(_) => {
                Condition::new(trade, name).phase(TradePhase::Init).maker().check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(MakerProcessDepositTxRequest),
                        Box::new(VerifyTakerFeeTx),
                        Box::new(VerifyPeerInputs),
                        Box::new(PrepareDepositInputs),
                        Box::new(MakerSignContract),
                        Box::new(MakerCreateDepositTx),
                        Box::new(SendInputsForDepositTxResponse),
                    ],
                )
                .start_timeout())
            }
            ExchangeMessage::InputsForDepositTxResponse(_) => {
                Condition::new(trade, name)
                    .phase(TradePhase::TakerFeePublished)
                    .taker()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(TakerProcessDepositTxResponse),
                        Box::new(VerifyPeerInputs),
                        Box::new(TakerVerifyContract),
                        Box::new(TakerVerifyDepositTx),
                        Box::new(TakerPublishDepositTx),
                        Box::new(SendDepositTxPublished),
                    ],
                )
                .stop_timeout())
            }
            ExchangeMessage::DepositTxPublished(_) => {
                Condition::new(trade, name)
                    .phase(TradePhase::TakerFeePublished)
                    .maker()
                    .check()?;
                Ok(Plan::new(name, vec![Box::new(MakerProcessDepositTxPublished)]).stop_timeout())
            }
            ExchangeMessage::FiatTransferStarted(_) => {
                Condition::new(trade, name)
                    .phase(TradePhase::DepositPublished)
                    .phase(TradePhase::DepositConfirmed)
                    .seller()
                    .check()?;
                Ok(Plan::new(name, vec![Box::new(SellerProcessFiatTransferStarted)]))
            }
            ExchangeMessage::PayoutTxPublished(_) => {
                Condition::new(trade, name)
                    .phase(TradePhase::FiatSent)
                    .buyer()
                    .check()?;
                Ok(Plan::new(name, vec![Box::new(BuyerProcessPayoutTxPublished)]))
            }
            other => Err(ProtocolError::UnexpectedTrigger {
                trigger: other.name().to_string(),
                phase: trade.phase(),
            }),
        }
    }

    fn on_ledger_tick(&self, trade: &Trade) -> Option<Plan> {
        matches!(
            trade.phase(),
            TradePhase::DepositPublished | TradePhase::DepositConfirmed
        )
        .then(|| Plan::new("LedgerTick", vec![Box::new(CheckDepositConfirmation)]))
    }
}
