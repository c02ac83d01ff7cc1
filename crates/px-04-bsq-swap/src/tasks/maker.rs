//! Maker side of the BSQ swap.

use crate::config::SwapConfig;
use crate::domain::{bsq_amount_range, verify_settlement_address, SwapAmounts};
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use px_03_trade_protocol::domain::{non_empty, required};
use px_03_trade_protocol::{send_direct_message, trigger_payload, ProcessModel};
use shared_types::{
    CreateSwapTxResponse, ExchangeMessage, PartiallySignedTx, ProtocolError, TradeState,
};
use std::sync::Arc;
use tracing::{debug, info};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Validate the taker's request against the offer and our own fee terms.
pub struct MakerProcessCreateSwapTxRequest {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerProcessCreateSwapTxRequest {
    fn name(&self) -> &'static str {
        "MakerProcessCreateSwapTxRequest"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let request = trigger_payload!(model, CreateSwapTxRequest);
        let offer = &model.trade.offer;

        if !offer.is_amount_in_range(request.trade_amount) {
            return Err(ProtocolError::AmountOutOfRange {
                what: "trade amount",
                amount: request.trade_amount,
                min: offer.min_amount,
                max: offer.amount,
            });
        }
        if request.trade_amount != model.trade.amount {
            return Err(ProtocolError::Validation(format!(
                "trade amount {} differs from the taken amount {}",
                request.trade_amount, model.trade.amount
            )));
        }
        offer
            .check_trade_price_tolerance(request.trade_price, None)
            .map_err(|e| ProtocolError::Validation(e.to_string()))?;

        let (min, max) = bsq_amount_range(offer, request.trade_price);
        if request.bsq_trade_amount < min || request.bsq_trade_amount > max {
            return Err(ProtocolError::AmountOutOfRange {
                what: "BSQ trade amount",
                amount: request.bsq_trade_amount,
                min,
                max,
            });
        }
        let amounts = SwapAmounts::for_trade(&model.trade, &self.config);
        if request.bsq_trade_amount != amounts.bsq_trade_amount {
            return Err(ProtocolError::Validation(format!(
                "BSQ trade amount {} does not match {}",
                request.bsq_trade_amount, amounts.bsq_trade_amount
            )));
        }
        if request.tx_fee_per_party != self.config.tx_fee_per_party {
            return Err(ProtocolError::Validation(format!(
                "tx fee per party {} does not match {}",
                request.tx_fee_per_party, self.config.tx_fee_per_party
            )));
        }
        non_empty(&request.taker_receive_address, "taker receive address")?;
        if request.taker_inputs.is_empty() {
            return Err(ProtocolError::Validation("taker sent no inputs".to_string()));
        }

        debug!(
            trade_id = %model.trade.id,
            amount = request.trade_amount,
            bsq_trade_amount = request.bsq_trade_amount,
            "Swap request accepted"
        );
        model.peer.inputs = request.taker_inputs;
        model.peer.outputs = request.taker_outputs;
        model.peer.receive_address = Some(request.taker_receive_address);
        Ok(())
    }
}

/// The taker's receive address must decode for our network and receive
/// the asset the taker is owed.
pub struct VerifySettlementAddress {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for VerifySettlementAddress {
    fn name(&self) -> &'static str {
        "VerifySettlementAddress"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let address = required(&model.peer.receive_address, "taker receive address")?;
        let taker_is_buyer = !model.trade.role.is_buyer();
        verify_settlement_address(
            &address,
            SwapAmounts::payout_asset(taker_is_buyer),
            self.config.network,
        )
    }
}

/// Assemble the swap transaction from both parties' inputs and outputs.
pub struct MakerCreateSwapTx {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerCreateSwapTx {
    fn name(&self) -> &'static str {
        "MakerCreateSwapTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let amounts = SwapAmounts::for_trade(&model.trade, &self.config);
        let is_buyer = model.trade.role.is_buyer();
        let taker_address = required(&model.peer.receive_address, "taker receive address")?;
        let my_address = required(&model.swap.my_receive_address, "own receive address")?;

        let taker_payout = amounts.payout(!is_buyer, amounts.taker_fee, &taker_address)?;
        let my_payout = amounts.payout(is_buyer, amounts.maker_fee, &my_address)?;

        let inputs = model
            .peer
            .inputs
            .iter()
            .chain(&model.my_inputs)
            .cloned()
            .collect();
        let mut outputs = model.peer.outputs.clone();
        outputs.push(taker_payout);
        outputs.extend(model.swap.my_outputs.iter().cloned());
        outputs.push(my_payout);

        let tx = model.services.wallet.build_transaction(inputs, outputs)?;
        debug!(trade_id = %model.trade.id, tx_id = %tx.tx_id(), "Swap transaction built");
        model.swap_tx = Some(PartiallySignedTx::new(tx));
        Ok(())
    }
}

/// Sign our inputs of the reconciled swap transaction.
pub struct MakerSignSwapTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerSignSwapTx {
    fn name(&self) -> &'static str {
        "MakerSignSwapTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let tx = required(&model.swap_tx, "swap transaction")?;
        let signed = model
            .services
            .wallet
            .sign(tx, &model.my_outpoints())
            .await?;
        model.swap_tx = Some(signed);
        model.set_state(TradeState::SwapMakerSignedTx)
    }
}

/// Return the partially signed transaction to the taker.
pub struct SendCreateSwapTxResponse;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendCreateSwapTxResponse {
    fn name(&self) -> &'static str {
        "SendCreateSwapTxResponse"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let tx = required(&model.swap_tx, "swap transaction")?;
        let message = ExchangeMessage::CreateSwapTxResponse(CreateSwapTxResponse {
            trade_id: model.trade.id,
            tx,
        });
        send_direct_message(model, message).await?;
        Ok(())
    }
}

/// The taker published: the announced id must be our transaction.
pub struct MakerProcessSwapTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerProcessSwapTxPublished {
    fn name(&self) -> &'static str {
        "MakerProcessSwapTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = trigger_payload!(model, SwapTxPublished);
        let expected = required(&model.swap_tx, "swap transaction")?.tx_id();
        if message.tx_id != expected {
            return Err(ProtocolError::Violation(format!(
                "published swap tx {} is not the signed transaction {expected}",
                message.tx_id
            )));
        }
        info!(trade_id = %model.trade.id, swap_tx_id = %expected, "Taker published the swap transaction");
        model.trade.swap_tx_id = Some(expected);
        model.set_state(TradeState::SwapTxPublished)
    }
}
