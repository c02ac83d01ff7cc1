//! Taker side of the escrow protocol.

use crate::trigger_payload;
use crate::domain::{
    build_contract, change_for, multisig_address, non_empty, required,
    ProcessModel, SendStates,
};
use crate::send::{send_direct_message, send_mailbox_message};
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_crypto::verify_hex_signature;
use shared_types::{
    Asset, DepositTxPublished, ExchangeMessage, InputsForDepositTxRequest, ProtocolError,
    TradeState, TxKind,
};
use tracing::{debug, info};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// The trade amount must lie within the offer's range.
pub struct TakerVerifyTradeAmount;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerVerifyTradeAmount {
    fn name(&self) -> &'static str {
        "TakerVerifyTradeAmount"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let trade = &step.model_ref().trade;
        if !trade.offer.is_amount_in_range(trade.amount) {
            return Err(ProtocolError::AmountOutOfRange {
                what: "trade amount",
                amount: trade.amount,
                min: trade.offer.min_amount,
                max: trade.offer.amount,
            });
        }
        if trade.price == 0 {
            return Err(ProtocolError::Validation("trade price must be positive".to_string()));
        }
        Ok(())
    }
}

/// Create and publish the taker fee transaction.
pub struct CreateTakerFeeTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for CreateTakerFeeTx {
    fn name(&self) -> &'static str {
        "CreateTakerFeeTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let fee = model.services.config.taker_fee;
        let tx_id = model
            .services
            .wallet
            .create_trade_fee_tx(&model.trade.id, fee)
            .await?;
        info!(trade_id = %model.trade.id, fee_tx_id = %tx_id, fee, "Taker fee published");
        model.trade.taker_fee_tx_id = Some(tx_id);
        model.set_state(TradeState::TakerPublishedTakerFeeTx)
    }
}

/// Open the trade with the maker.
pub struct SendInputsForDepositTxRequest;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendInputsForDepositTxRequest {
    fn name(&self) -> &'static str {
        "SendInputsForDepositTxRequest"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let trade = &model.trade;
        let request = InputsForDepositTxRequest {
            trade_id: trade.id,
            trade_amount: trade.amount,
            trade_price: trade.price,
            taker_fee_tx_id: required(&trade.taker_fee_tx_id, "taker fee tx id")?,
            taker_inputs: model.my_inputs.clone(),
            taker_change_address: required(&model.my_change_address, "change address")?,
            taker_payout_address: model.require_my_payout_address()?,
            taker_account_id: model.services.account_id.clone(),
            taker_payment_method_id: trade.offer.payment_method_id.clone(),
            taker_signing_pub_key: model.services.key_ring.pub_key_hex(),
            mediator: trade.mediator.clone(),
            refund_agent: trade.refund_agent.clone(),
        };
        send_direct_message(model, ExchangeMessage::InputsForDepositTxRequest(request)).await?;
        Ok(())
    }
}

/// Record the maker's inputs, addresses and the partially signed deposit.
pub struct TakerProcessDepositTxResponse;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerProcessDepositTxResponse {
    fn name(&self) -> &'static str {
        "TakerProcessDepositTxResponse"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let response = trigger_payload!(model, InputsForDepositTxResponse);

        non_empty(&response.maker_payout_address, "maker payout address")?;
        non_empty(&response.maker_account_id, "maker account id")?;
        non_empty(&response.maker_signing_pub_key, "maker signing key")?;
        non_empty(&response.maker_contract_signature, "maker contract signature")?;

        model.peer.inputs = response.maker_inputs;
        model.peer.payout_address = Some(response.maker_payout_address);
        model.peer.account_id = Some(response.maker_account_id);
        model.peer.signing_pub_key = Some(response.maker_signing_pub_key);
        model.peer.contract_signature = Some(response.maker_contract_signature.clone());
        model.trade.maker_contract_signature = Some(response.maker_contract_signature);
        model.deposit_tx = Some(response.deposit_tx);
        model.set_state(TradeState::TakerReceivedDepositTxInputs)
    }
}

/// Build the contract ourselves, check the maker signed exactly that, and
/// sign it too.
pub struct TakerVerifyContract;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerVerifyContract {
    fn name(&self) -> &'static str {
        "TakerVerifyContract"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let contract = build_contract(model)?;
        let bytes = contract.canonical_bytes()?;
        let maker_key = required(&model.peer.signing_pub_key, "maker signing key")?;
        let maker_signature = required(&model.peer.contract_signature, "maker contract signature")?;

        verify_hex_signature(&maker_key, &bytes, &maker_signature)
            .map_err(|_| ProtocolError::ContractSignatureMismatch)?;

        model.trade.taker_contract_signature = Some(model.services.key_ring.sign_hex(&bytes));
        model.trade.contract_hash = Some(contract.hash()?);
        model.trade.contract = Some(contract);
        Ok(())
    }
}

/// The deposit must spend exactly both parties' inputs, lock the full
/// deposit amount in escrow and return our change.
pub struct TakerVerifyDepositTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerVerifyDepositTx {
    fn name(&self) -> &'static str {
        "TakerVerifyDepositTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model_ref();
        let deposit = model
            .deposit_tx
            .as_ref()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("deposit tx".to_string()))?;
        let trade = &model.trade;

        let expected_inputs = model.my_inputs.len() + model.peer.inputs.len();
        let all_spent = model
            .my_inputs
            .iter()
            .chain(model.peer.inputs.iter())
            .all(|i| deposit.tx.spends(&i.outpoint));
        if deposit.tx.inputs.len() != expected_inputs || !all_spent {
            return Err(ProtocolError::Violation(
                "deposit tx does not spend exactly the agreed inputs".to_string(),
            ));
        }

        if deposit
            .tx
            .find_output(&multisig_address(trade), Asset::Btc, trade.deposit_amount())
            .is_none()
        {
            return Err(ProtocolError::Violation(format!(
                "deposit tx does not lock {} sat in escrow",
                trade.deposit_amount()
            )));
        }

        let my_change = change_for(&model.my_inputs, trade.my_deposit_contribution())?;
        if my_change > 0 {
            let change_address = required(&model.my_change_address, "change address")?;
            if deposit
                .tx
                .find_output(&change_address, Asset::Btc, my_change)
                .is_none()
            {
                return Err(ProtocolError::Violation(
                    "deposit tx does not return our change".to_string(),
                ));
            }
        }

        let (btc_in, btc_out) = match (
            deposit.tx.input_sum(Asset::Btc),
            deposit.tx.output_sum(Asset::Btc),
        ) {
            (Some(btc_in), Some(btc_out)) => (btc_in, btc_out),
            _ => {
                return Err(ProtocolError::Violation(
                    "deposit tx value sum overflows".to_string(),
                ))
            }
        };
        if btc_out > btc_in {
            return Err(ProtocolError::NegativeTxFee { btc_in, btc_out });
        }

        let unsigned_maker_input = model
            .peer
            .inputs
            .iter()
            .find(|i| deposit.signature_count(&i.outpoint) == 0);
        if let Some(input) = unsigned_maker_input {
            return Err(ProtocolError::Violation(format!(
                "maker input {}:{} is not signed",
                input.outpoint.tx_id, input.outpoint.index
            )));
        }

        debug!(trade_id = %trade.id, deposit_tx_id = %deposit.tx_id(), "Deposit tx verified");
        Ok(())
    }
}

/// Sign our inputs and publish the deposit.
pub struct TakerPublishDepositTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for TakerPublishDepositTx {
    fn name(&self) -> &'static str {
        "TakerPublishDepositTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let deposit = model
            .deposit_tx
            .clone()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("deposit tx".to_string()))?;
        let wallet = model.services.wallet.clone();

        let signed = wallet.sign(deposit, &model.my_outpoints()).await?;
        model.deposit_tx = Some(signed.clone());
        let tx_id = wallet.broadcast(&signed, TxKind::Deposit).await?;
        info!(trade_id = %model.trade.id, deposit_tx_id = %tx_id, "Deposit published");

        model.trade.deposit_tx_id = Some(tx_id);
        model.set_state(TradeState::TakerPublishedDepositTx)
    }
}

/// Tell the maker the deposit is published.
pub struct SendDepositTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendDepositTxPublished {
    fn name(&self) -> &'static str {
        "SendDepositTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = ExchangeMessage::DepositTxPublished(DepositTxPublished {
            trade_id: model.trade.id,
            deposit_tx_id: model.trade.deposit_tx_id.clone(),
            taker_contract_signature: required(
                &model.trade.taker_contract_signature,
                "taker contract signature",
            )?,
        });
        send_mailbox_message(model, message, SendStates::DEPOSIT_TX_PUBLISHED).await
    }
}
