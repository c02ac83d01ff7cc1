//! # BSQ Swap Flow
//!
//! ```text
//! Taker                                      Maker
//!   TakeOffer
//!   inputs, outputs ──CreateSwapTxRequest──→ validate, verify address + inputs
//!                                            build, reconcile, sign
//!   verify, reconcile ←─CreateSwapTxResponse──
//!   sign, publish
//!   completed ─────────SwapTxPublished──────→ completed
//! ```
//!
//! Neither party signs before its own reconciliation passed. The maker
//! also completes when the transaction appears on the ledger.

use crate::config::SwapConfig;
use crate::tasks::{
    CheckSwapTxOnLedger, CompleteSwap, MakerCreateSwapTx, MakerProcessCreateSwapTxRequest,
    MakerProcessSwapTxPublished, MakerSignSwapTx, PrepareSwapInputs, ReconcileSwapTx,
    SendCreateSwapTxRequest, SendCreateSwapTxResponse, SendSwapTxPublished,
    TakerProcessCreateSwapTxResponse, TakerSignAndPublishSwapTx, TakerVerifySwapTerms,
    VerifySettlementAddress,
};
use px_03_trade_protocol::tasks::VerifyPeerInputs;
use px_03_trade_protocol::{Condition, Plan, ProtocolFlow, TradeAction};
use shared_types::{ExchangeMessage, ProtocolError, ProtocolKind, Trade, TradeState};
use std::sync::Arc;

/// Single-transaction BSQ/BTC swap.
#[derive(Debug, Clone, Default)]
pub struct BsqSwapFlow {
    config: Arc<SwapConfig>,
}

impl BsqSwapFlow {
    pub fn new(config: SwapConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }
}

impl ProtocolFlow for BsqSwapFlow {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::BsqSwap
    }

    fn on_action(&self, trade: &Trade, action: TradeAction) -> Result<Plan, ProtocolError> {
        let name = action.name();
        match action {
            TradeAction::TakeOffer => {
                Condition::new(trade, name)
                    .state(TradeState::SwapPreparation)
                    .taker()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(TakerVerifySwapTerms {
                            config: self.config.clone(),
                        }),
                        Box::new(PrepareSwapInputs {
                            config: self.config.clone(),
                        }),
                        Box::new(SendCreateSwapTxRequest),
                    ],
                )
                .start_timeout())
            }
            TradeAction::ConfirmPaymentStarted
            | TradeAction::ConfirmPaymentReceived
            | TradeAction::RetryFailedSend => Err(ProtocolError::UnexpectedTrigger {
                trigger: name.to_string(),
                phase: trade.phase(),
            }),
        }
    }

    fn on_message(&self, trade: &Trade, message: &ExchangeMessage) -> Result<Plan, ProtocolError> {
        let name = message.name();
        match message {
            ExchangeMessage::CreateSwapTxRequest(_) => {
                Condition::new(trade, name)
                    .state(TradeState::SwapPreparation)
                    .maker()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(MakerProcessCreateSwapTxRequest {
                            config: self.config.clone(),
                        }),
                        Box::new(VerifySettlementAddress {
                            config: self.config.clone(),
                        }),
                        Box::new(VerifyPeerInputs),
                        Box::new(PrepareSwapInputs {
                            config: self.config.clone(),
                        }),
                        Box::new(MakerCreateSwapTx {
                            config: self.config.clone(),
                        }),
                        Box::new(ReconcileSwapTx),
                        Box::new(MakerSignSwapTx),
                        Box::new(SendCreateSwapTxResponse),
                    ],
                )
                .start_timeout())
            }
            ExchangeMessage::CreateSwapTxResponse(_) => {
                Condition::new(trade, name)
                    .state(TradeState::SwapTakerSentCreateTxRequest)
                    .taker()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![
                        Box::new(TakerProcessCreateSwapTxResponse {
                            config: self.config.clone(),
                        }),
                        Box::new(VerifyPeerInputs),
                        Box::new(ReconcileSwapTx),
                        Box::new(TakerSignAndPublishSwapTx),
                        Box::new(SendSwapTxPublished),
                        Box::new(CompleteSwap),
                    ],
                )
                .stop_timeout())
            }
            ExchangeMessage::SwapTxPublished(_) => {
                Condition::new(trade, name)
                    .state(TradeState::SwapMakerSignedTx)
                    .maker()
                    .check()?;
                Ok(Plan::new(
                    name,
                    vec![Box::new(MakerProcessSwapTxPublished), Box::new(CompleteSwap)],
                )
                .stop_timeout())
            }
            other => Err(ProtocolError::UnexpectedTrigger {
                trigger: other.name().to_string(),
                phase: trade.phase(),
            }),
        }
    }

    fn on_ledger_tick(&self, trade: &Trade) -> Option<Plan> {
        (trade.state == TradeState::SwapMakerSignedTx)
            .then(|| Plan::new("LedgerTick", vec![Box::new(CheckSwapTxOnLedger)]))
    }
}
