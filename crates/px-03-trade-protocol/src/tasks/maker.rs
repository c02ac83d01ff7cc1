//! Maker side of the escrow protocol.

use crate::trigger_payload;
use crate::domain::{
    build_contract, build_deposit_tx, non_empty, required, ProcessModel, SendStates,
};
use crate::send::send_mailbox_message;
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_crypto::verify_hex_signature;
use shared_types::{
    ExchangeMessage, InputsForDepositTxResponse, PartiallySignedTx, PriceRule, ProtocolError,
    TradeState,
};
use tracing::{debug, info};

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Validate the taker's opening request and record what it tells us.
pub struct MakerProcessDepositTxRequest;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerProcessDepositTxRequest {
    fn name(&self) -> &'static str {
        "MakerProcessDepositTxRequest"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let request = trigger_payload!(model, InputsForDepositTxRequest);
        let offer = &model.trade.offer;

        if !offer.is_amount_in_range(request.trade_amount) {
            return Err(ProtocolError::AmountOutOfRange {
                what: "trade amount",
                amount: request.trade_amount,
                min: offer.min_amount,
                max: offer.amount,
            });
        }
        if request.trade_amount != model.trade.amount || request.trade_price != model.trade.price {
            return Err(ProtocolError::Validation(
                "trade terms differ from the accepted take-offer request".to_string(),
            ));
        }
        if let PriceRule::Fixed(price) = offer.price {
            if price != request.trade_price {
                return Err(ProtocolError::Validation(format!(
                    "trade price {} differs from fixed offer price {price}",
                    request.trade_price
                )));
            }
        }
        if request.taker_payment_method_id != offer.payment_method_id {
            return Err(ProtocolError::Validation(format!(
                "payment method {} does not match offer",
                request.taker_payment_method_id
            )));
        }
        non_empty(&request.taker_fee_tx_id, "taker fee tx id")?;
        non_empty(&request.taker_change_address, "taker change address")?;
        non_empty(&request.taker_payout_address, "taker payout address")?;
        non_empty(&request.taker_account_id, "taker account id")?;
        non_empty(&request.taker_signing_pub_key, "taker signing key")?;
        if request.taker_inputs.is_empty() {
            return Err(ProtocolError::Validation("taker sent no inputs".to_string()));
        }

        model.trade.taker_fee_tx_id = Some(request.taker_fee_tx_id);
        model.trade.mediator = request.mediator;
        model.trade.refund_agent = request.refund_agent;
        model.peer.inputs = request.taker_inputs;
        model.peer.change_address = Some(request.taker_change_address);
        model.peer.payout_address = Some(request.taker_payout_address);
        model.peer.account_id = Some(request.taker_account_id);
        model.peer.payment_method_id = Some(request.taker_payment_method_id);
        model.peer.signing_pub_key = Some(request.taker_signing_pub_key);
        Ok(())
    }
}

/// Build and sign the contract.
pub struct MakerSignContract;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerSignContract {
    fn name(&self) -> &'static str {
        "MakerSignContract"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let contract = build_contract(model)?;
        let signature = model.services.key_ring.sign_hex(&contract.canonical_bytes()?);
        model.trade.contract_hash = Some(contract.hash()?);
        model.trade.contract = Some(contract);
        model.trade.maker_contract_signature = Some(signature);
        Ok(())
    }
}

/// Build the deposit transaction and sign our inputs.
pub struct MakerCreateDepositTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerCreateDepositTx {
    fn name(&self) -> &'static str {
        "MakerCreateDepositTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let layout = build_deposit_tx(
            &model.trade,
            &model.peer.inputs,
            &required(&model.peer.change_address, "taker change address")?,
            &model.my_inputs,
            &required(&model.my_change_address, "change address")?,
        )?;
        let wallet = model.services.wallet.clone();
        let tx = wallet.build_transaction(layout.inputs, layout.outputs)?;
        let signed = wallet
            .sign(PartiallySignedTx::new(tx), &model.my_outpoints())
            .await?;
        debug!(trade_id = %model.trade.id, deposit_tx_id = %signed.tx_id(), "Deposit tx created");
        model.deposit_tx = Some(signed);
        Ok(())
    }
}

/// Answer the taker with our inputs, the deposit and our contract signature.
pub struct SendInputsForDepositTxResponse;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendInputsForDepositTxResponse {
    fn name(&self) -> &'static str {
        "SendInputsForDepositTxResponse"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let response = InputsForDepositTxResponse {
            trade_id: model.trade.id,
            maker_inputs: model.my_inputs.clone(),
            maker_payout_address: model.require_my_payout_address()?,
            maker_account_id: model.services.account_id.clone(),
            maker_signing_pub_key: model.services.key_ring.pub_key_hex(),
            maker_contract_signature: required(
                &model.trade.maker_contract_signature,
                "maker contract signature",
            )?,
            deposit_tx: required(&model.deposit_tx, "deposit tx")?,
        };
        send_mailbox_message(
            model,
            ExchangeMessage::InputsForDepositTxResponse(response),
            SendStates::DEPOSIT_TX_INPUTS,
        )
        .await
    }
}

/// The taker reports the published deposit and its contract signature.
pub struct MakerProcessDepositTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for MakerProcessDepositTxPublished {
    fn name(&self) -> &'static str {
        "MakerProcessDepositTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = trigger_payload!(model, DepositTxPublished);

        let tx_id = message.deposit_tx_id.ok_or_else(|| {
            ProtocolError::Violation("deposit published without a transaction id".to_string())
        })?;
        let expected = model
            .deposit_tx
            .as_ref()
            .map(PartiallySignedTx::tx_id)
            .ok_or_else(|| ProtocolError::ContextNotAvailable("deposit tx".to_string()))?;
        if tx_id != expected {
            return Err(ProtocolError::Violation(format!(
                "published deposit {tx_id} is not the deposit we signed"
            )));
        }

        let contract = model
            .trade
            .contract
            .as_ref()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("contract".to_string()))?;
        let taker_key = required(&model.peer.signing_pub_key, "taker signing key")?;
        verify_hex_signature(
            &taker_key,
            &contract.canonical_bytes()?,
            &message.taker_contract_signature,
        )
        .map_err(|_| ProtocolError::ContractSignatureMismatch)?;

        info!(trade_id = %model.trade.id, deposit_tx_id = %tx_id, "Taker published deposit");
        model.peer.contract_signature = Some(message.taker_contract_signature.clone());
        model.trade.taker_contract_signature = Some(message.taker_contract_signature);
        model.trade.deposit_tx_id = Some(tx_id);
        model.set_state(TradeState::MakerReceivedDepositTxPublishedMsg)
    }
}
