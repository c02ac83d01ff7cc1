//! Tasks run by both swap parties.

use crate::config::SwapConfig;
use crate::domain::{change_output, reconcile, SwapAmounts};
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use px_03_trade_protocol::domain::required;
use px_03_trade_protocol::{ProcessModel, SwapTerms};
use shared_types::{ProtocolError, TradeState};
use std::sync::Arc;
use tracing::{debug, info};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Select our swap inputs, reserve change and receive addresses and fix
/// the swap terms on the model.
pub struct PrepareSwapInputs {
    pub config: Arc<SwapConfig>,
}

#[async_trait]
impl Task<ProcessModel, ProtocolError> for PrepareSwapInputs {
    fn name(&self) -> &'static str {
        "PrepareSwapInputs"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let wallet = model.services.wallet.clone();
        let is_buyer = model.trade.role.is_buyer();
        let amounts = SwapAmounts::for_trade(&model.trade, &self.config);
        let own_fee = amounts.fee_of(model.trade.role.is_maker());
        let (asset, contribution) = amounts.contribution(is_buyer, own_fee);

        let inputs = wallet.select_inputs(asset, contribution).await?;
        let change_address = wallet.fresh_address(asset).await?;
        let receive_address = wallet
            .fresh_address(SwapAmounts::payout_asset(is_buyer))
            .await?;
        let change = change_output(&inputs, asset, contribution, &change_address)?;

        debug!(
            trade_id = %model.trade.id,
            asset = ?asset,
            contribution,
            change = change.as_ref().map_or(0, |c| c.value),
            "Swap inputs selected"
        );
        model.my_inputs = inputs;
        model.my_change_address = Some(change_address);
        model.swap = SwapTerms {
            bsq_trade_amount: amounts.bsq_trade_amount,
            bsq_trade_fee: amounts.bsq_trade_fee(),
            tx_fee_per_party: amounts.tx_fee_per_party,
            my_outputs: change.into_iter().collect(),
            my_receive_address: Some(receive_address),
        };
        Ok(())
    }
}

/// Check value conservation of the swap transaction. Runs before any
/// signature is produced.
pub struct ReconcileSwapTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for ReconcileSwapTx {
    fn name(&self) -> &'static str {
        "ReconcileSwapTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let tx = required(&model.swap_tx, "swap transaction")?;
        let balance = reconcile(&tx.tx, model.swap.bsq_trade_fee)?;
        debug!(
            trade_id = %model.trade.id,
            bsq_in = balance.bsq_in,
            bsq_out = balance.bsq_out,
            btc_in = balance.btc_in,
            btc_out = balance.btc_out,
            tx_fee = balance.tx_fee,
            "Swap transaction reconciled"
        );
        Ok(())
    }
}

/// Final swap state.
pub struct CompleteSwap;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for CompleteSwap {
    fn name(&self) -> &'static str {
        "CompleteSwap"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        info!(
            trade_id = %model.trade.id,
            swap_tx_id = model.trade.swap_tx_id.as_deref().unwrap_or_default(),
            "BSQ swap completed"
        );
        model.set_state(TradeState::SwapCompleted)
    }
}

/// Maker side: complete the swap once the signed transaction shows up on
/// the ledger, even if the taker's notification never arrives.
pub struct CheckSwapTxOnLedger;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for CheckSwapTxOnLedger {
    fn name(&self) -> &'static str {
        "CheckSwapTxOnLedger"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let Some(tx) = model.swap_tx.as_ref() else {
            return Ok(());
        };
        let tx_id = tx.tx_id();
        if model.services.ledger.get_transaction(&tx_id).await?.is_none() {
            return Ok(());
        }
        info!(trade_id = %model.trade.id, swap_tx_id = %tx_id, "Swap transaction seen on the ledger");
        model.trade.swap_tx_id = Some(tx_id);
        model.set_state(TradeState::SwapTxPublished)?;
        model.set_state(TradeState::SwapCompleted)
    }
}
