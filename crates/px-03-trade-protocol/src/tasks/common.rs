//! Tasks run by both parties.

use crate::domain::ProcessModel;
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_types::{Asset, ProtocolError, TradePhase, TradeState, TxKind};
use tracing::{debug, info, warn};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Select our deposit inputs and reserve change and payout addresses.
pub struct PrepareDepositInputs;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for PrepareDepositInputs {
    fn name(&self) -> &'static str {
        "PrepareDepositInputs"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let wallet = model.services.wallet.clone();
        let contribution = model.trade.my_deposit_contribution();

        model.my_inputs = wallet.select_inputs(Asset::Btc, contribution).await?;
        model.my_change_address = Some(wallet.fresh_address(Asset::Btc).await?);
        model.my_payout_address = Some(wallet.fresh_address(Asset::Btc).await?);
        debug!(
            trade_id = %model.trade.id,
            inputs = model.my_inputs.len(),
            contribution,
            "Deposit inputs selected"
        );
        Ok(())
    }
}

/// Check every peer input against the ledger: it must exist, be unspent
/// and match the claimed asset and value.
pub struct VerifyPeerInputs;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for VerifyPeerInputs {
    fn name(&self) -> &'static str {
        "VerifyPeerInputs"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        if model.peer.inputs.is_empty() {
            return Err(ProtocolError::Validation("peer sent no inputs".to_string()));
        }

        for input in &model.peer.inputs {
            let output = model
                .services
                .ledger
                .get_output(&input.outpoint)
                .await?
                .ok_or_else(|| ProtocolError::TxNotFound {
                    tx_id: input.outpoint.tx_id.clone(),
                })?;
            if output.spent {
                return Err(ProtocolError::Violation(format!(
                    "peer input {}:{} is already spent",
                    input.outpoint.tx_id, input.outpoint.index
                )));
            }
            if output.asset != input.asset || output.value != input.value {
                return Err(ProtocolError::Violation(format!(
                    "peer input {}:{} claims {} {:?} but ledger has {} {:?}",
                    input.outpoint.tx_id,
                    input.outpoint.index,
                    input.value,
                    input.asset,
                    output.value,
                    output.asset
                )));
            }
        }
        Ok(())
    }
}

/// The taker's fee transaction must be on the ledger as a trade fee.
pub struct VerifyTakerFeeTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for VerifyTakerFeeTx {
    fn name(&self) -> &'static str {
        "VerifyTakerFeeTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let tx_id = model
            .trade
            .taker_fee_tx_id
            .clone()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("taker fee tx id".to_string()))?;

        let tx = model
            .services
            .ledger
            .get_transaction(&tx_id)
            .await?
            .ok_or_else(|| ProtocolError::TxNotFound {
                tx_id: tx_id.clone(),
            })?;
        if tx.kind != TxKind::TradeFee {
            return Err(ProtocolError::UnexpectedTx {
                tx_id,
                reason: format!("expected trade fee, found {:?}", tx.kind),
            });
        }
        Ok(())
    }
}

/// Track the deposit on the ledger: confirm it, or reset the trade when a
/// confirmed deposit disappears.
pub struct CheckDepositConfirmation;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for CheckDepositConfirmation {
    fn name(&self) -> &'static str {
        "CheckDepositConfirmation"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let Some(tx_id) = model.trade.deposit_tx_id.clone() else {
            return Ok(());
        };
        let required = model.services.config.required_confirmations;
        let tx = model.services.ledger.get_transaction(&tx_id).await?;

        match (model.trade.phase(), tx) {
            (TradePhase::DepositPublished, Some(tx)) if tx.confirmations >= required => {
                info!(trade_id = %model.trade.id, confirmations = tx.confirmations, "Deposit confirmed");
                model.set_state(TradeState::DepositConfirmedInBlockChain)?;
            }
            (TradePhase::DepositConfirmed, None) => {
                let from = model.trade.state;
                if model.trade.reset_to_deposit_checkpoint() {
                    warn!(
                        trade_id = %model.trade.id,
                        deposit_tx_id = %tx_id,
                        "Deposit vanished from the ledger, waiting for confirmation again"
                    );
                    let to = model.trade.state;
                    model.note_transition(from, to);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
