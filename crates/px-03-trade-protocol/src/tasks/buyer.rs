//! Buyer side of the escrow payout.

use crate::trigger_payload;
use crate::domain::{build_payout_tx, non_empty, payout_amounts, required, ProcessModel, SendStates};
use crate::send::send_mailbox_message;
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_types::{
    ExchangeMessage, FiatTransferStarted, PartiallySignedTx, ProtocolError, TradeState,
};
use tracing::info;

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// Build the payout and sign the escrow input.
pub struct BuyerSignPayoutTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for BuyerSignPayoutTx {
    fn name(&self) -> &'static str {
        "BuyerSignPayoutTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let tx = build_payout_tx(model)?;
        let escrow = tx.inputs[0].outpoint.clone();
        let signed = model
            .services
            .wallet
            .sign(PartiallySignedTx::new(tx), &[escrow])
            .await?;
        model.payout_tx = Some(signed);
        model.set_state(TradeState::BuyerConfirmedFiatPaymentInitiated)
    }
}

/// Hand our payout signature to the seller.
pub struct SendFiatTransferStarted;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendFiatTransferStarted {
    fn name(&self) -> &'static str {
        "SendFiatTransferStarted"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let payout = required(&model.payout_tx, "payout tx")?;
        let wallet_id = model.services.wallet.wallet_id();
        let signature = payout
            .signatures
            .iter()
            .find(|s| s.signer == wallet_id)
            .cloned()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("own payout signature".to_string()))?;
        let contract = required(&model.trade.contract, "contract")?;
        let (buyer_payout_amount, seller_payout_amount) = payout_amounts(&model.trade);

        let message = ExchangeMessage::FiatTransferStarted(FiatTransferStarted {
            trade_id: model.trade.id,
            buyer_payout_address: contract.buyer_payout_address,
            buyer_payout_amount,
            seller_payout_amount,
            buyer_signature: signature,
        });
        send_mailbox_message(model, message, SendStates::FIAT_PAYMENT_INITIATED).await
    }
}

/// The seller published the payout.
pub struct BuyerProcessPayoutTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for BuyerProcessPayoutTxPublished {
    fn name(&self) -> &'static str {
        "BuyerProcessPayoutTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = trigger_payload!(model, PayoutTxPublished);
        non_empty(&message.payout_tx_id, "payout tx id")?;

        info!(trade_id = %model.trade.id, payout_tx_id = %message.payout_tx_id, "Payout received");
        model.trade.payout_tx_id = Some(message.payout_tx_id);
        model.set_state(TradeState::BuyerReceivedPayoutTxPublishedMsg)
    }
}
