//! Taker side of the BSQ swap.

use crate::config::SwapConfig;
use crate::domain::{bsq_amount_range, SwapAmounts};
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use px_03_trade_protocol::domain::required;
use px_03_trade_protocol::{send_direct_message, trigger_payload, ProcessModel};
use shared_types::{
    CreateSwapTxRequest, ExchangeMessage, ProtocolError, SwapTxPublished, TradeState, TxKind,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Check amount, price and derived BSQ amount before committing inputs.
pub struct TakerVerifySwapTerms {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerVerifySwapTerms {
    fn name(&self) -> &'static str {
        "TakerVerifySwapTerms"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let trade = &step.model_ref().trade;
        let offer = &trade.offer;
        if !offer.is_amount_in_range(trade.amount) {
            return Err(ProtocolError::AmountOutOfRange {
                what: "trade amount",
                amount: trade.amount,
                min: offer.min_amount,
                max: offer.amount,
            });
        }
        offer
            .check_trade_price_tolerance(trade.price, None)
            .map_err(|e| ProtocolError::Validation(e.to_string()))?;

        let amounts = SwapAmounts::for_trade(trade, &self.config);
        let (min, max) = bsq_amount_range(offer, trade.price);
        if amounts.bsq_trade_amount < min || amounts.bsq_trade_amount > max {
            return Err(ProtocolError::AmountOutOfRange {
                what: "BSQ trade amount",
                amount: amounts.bsq_trade_amount,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Open the swap with the maker.
pub struct SendCreateSwapTxRequest;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendCreateSwapTxRequest {
    fn name(&self) -> &'static str {
        "SendCreateSwapTxRequest"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let receive_address = required(&model.swap.my_receive_address, "own receive address")?;
        let message = ExchangeMessage::CreateSwapTxRequest(CreateSwapTxRequest {
            trade_id: model.trade.id,
            trade_amount: model.trade.amount,
            trade_price: model.trade.price,
            bsq_trade_amount: model.swap.bsq_trade_amount,
            taker_inputs: model.my_inputs.clone(),
            taker_outputs: model.swap.my_outputs.clone(),
            taker_receive_address: receive_address,
            tx_fee_per_party: model.swap.tx_fee_per_party,
        });
        model.set_state(TradeState::SwapTakerSentCreateTxRequest)?;
        send_direct_message(model, message).await?;
        Ok(())
    }
}

/// Check that the maker's transaction spends our inputs, pays our change
/// and payout in full, and carries the maker's signatures.
pub struct TakerProcessCreateSwapTxResponse {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerProcessCreateSwapTxResponse {
    fn name(&self) -> &'static str {
        "TakerProcessCreateSwapTxResponse"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let response = trigger_payload!(model, CreateSwapTxResponse);
        let tx = &response.tx.tx;

        for input in &model.my_inputs {
            if !tx.inputs.contains(input) {
                return Err(ProtocolError::Violation(format!(
                    "swap tx does not spend our input {}:{}",
                    input.outpoint.tx_id, input.outpoint.index
                )));
            }
        }
        for output in &model.swap.my_outputs {
            if tx.find_output(&output.address, output.asset, output.value).is_none() {
                return Err(ProtocolError::Violation(format!(
                    "swap tx is missing our change output of {}",
                    output.value
                )));
            }
        }

        let amounts = SwapAmounts::for_trade(&model.trade, &self.config);
        let receive_address = required(&model.swap.my_receive_address, "own receive address")?;
        let payout = amounts.payout(
            model.trade.role.is_buyer(),
            amounts.taker_fee,
            &receive_address,
        )?;
        if tx.find_output(&payout.address, payout.asset, payout.value).is_none() {
            return Err(ProtocolError::Violation(format!(
                "swap tx does not pay {} {:?} to our receive address",
                payout.value, payout.asset
            )));
        }

        let peer_inputs: Vec<_> = tx
            .inputs
            .iter()
            .filter(|i| !model.my_inputs.contains(i))
            .cloned()
            .collect();
        if let Some(unsigned) = peer_inputs
            .iter()
            .find(|i| response.tx.signature_count(&i.outpoint) == 0)
        {
            return Err(ProtocolError::Violation(format!(
                "maker input {}:{} is not signed",
                unsigned.outpoint.tx_id, unsigned.outpoint.index
            )));
        }

        debug!(
            trade_id = %model.trade.id,
            tx_id = %response.tx.tx_id(),
            maker_inputs = peer_inputs.len(),
            "Swap transaction matches our terms"
        );
        model.peer.inputs = peer_inputs;
        model.swap_tx = Some(response.tx);
        Ok(())
    }
}

/// Add our signatures and broadcast.
pub struct TakerSignAndPublishSwapTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerSignAndPublishSwapTx {
    fn name(&self) -> &'static str {
        "TakerSignAndPublishSwapTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let wallet = model.services.wallet.clone();
        let tx = required(&model.swap_tx, "swap transaction")?;
        let signed = wallet.sign(tx, &model.my_outpoints()).await?;
        let tx_id = wallet.broadcast(&signed, TxKind::Swap).await?;
        info!(trade_id = %model.trade.id, swap_tx_id = %tx_id, "Swap transaction published");
        model.swap_tx = Some(signed);
        model.trade.swap_tx_id = Some(tx_id);
        model.set_state(TradeState::SwapTxPublished)
    }
}

/// Tell the maker. The maker also watches the ledger, so a failed send
/// does not fail the trade.
pub struct SendSwapTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendSwapTxPublished {
    fn name(&self) -> &'static str {
        "SendSwapTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let tx_id = required(&model.trade.swap_tx_id, "swap tx id")?;
        let message = ExchangeMessage::SwapTxPublished(SwapTxPublished {
            trade_id: model.trade.id,
            tx_id,
        });
        if let Err(e) = send_direct_message(model, message).await {
            warn!(trade_id = %model.trade.id, error = %e, "Maker not notified of the swap transaction");
        }
        Ok(())
    }
}
