//! Seller side of the escrow payout.

use crate::trigger_payload;
use crate::domain::{build_payout_tx, non_empty, payout_amounts, required, ProcessModel, SendStates};
use crate::send::send_mailbox_message;
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_types::{
    ExchangeMessage, PartiallySignedTx, PayoutTxPublished, ProtocolError, TradeState, TxKind,
};
use tracing::info;

type ModelStep<'a> = Step<'a, ProcessModel, ProtocolError>;

/// The buyer reports the external payment and signs the payout.
pub struct SellerProcessFiatTransferStarted;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SellerProcessFiatTransferStarted {
    fn name(&self) -> &'static str {
        "SellerProcessFiatTransferStarted"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = trigger_payload!(model, FiatTransferStarted);

        if message.buyer_payout_amount == 0 || message.seller_payout_amount == 0 {
            return Err(ProtocolError::Validation(
                "payout amounts must be positive".to_string(),
            ));
        }
        non_empty(&message.buyer_payout_address, "buyer payout address")?;
        non_empty(&message.buyer_signature.signer, "buyer signer")?;
        non_empty(&message.buyer_signature.signature, "buyer signature")?;

        let contract = required(&model.trade.contract, "contract")?;
        if message.buyer_payout_address != contract.buyer_payout_address {
            return Err(ProtocolError::Violation(
                "buyer payout address differs from the contract".to_string(),
            ));
        }
        let expected = payout_amounts(&model.trade);
        if (message.buyer_payout_amount, message.seller_payout_amount) != expected {
            return Err(ProtocolError::Violation(format!(
                "payout split {}/{} differs from agreed {}/{}",
                message.buyer_payout_amount, message.seller_payout_amount, expected.0, expected.1
            )));
        }

        model.peer.payout_amount = Some(message.buyer_payout_amount);
        model.peer.payout_signature = Some(message.buyer_signature);
        model.set_state(TradeState::SellerReceivedFiatPaymentInitiatedMsg)
    }
}

/// The seller confirmed receipt of the external payment.
pub struct SellerConfirmPaymentReceipt;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SellerConfirmPaymentReceipt {
    fn name(&self) -> &'static str {
        "SellerConfirmPaymentReceipt"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        step.model()
            .set_state(TradeState::SellerConfirmedFiatPaymentReceipt)
    }
}

/// Add our signature to the buyer's and publish the payout.
pub struct SellerPublishPayoutTx;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SellerPublishPayoutTx {
    fn name(&self) -> &'static str {
        "SellerPublishPayoutTx"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let tx = build_payout_tx(model)?;
        let escrow = tx.inputs[0].outpoint.clone();
        let buyer_signature = required(&model.peer.payout_signature, "buyer payout signature")?;
        if buyer_signature.outpoint != escrow {
            return Err(ProtocolError::Violation(
                "buyer signed a different escrow output".to_string(),
            ));
        }

        let mut payout = PartiallySignedTx::new(tx);
        payout.add_signature(buyer_signature);
        let wallet = model.services.wallet.clone();
        let signed = wallet.sign(payout, &[escrow]).await?;
        let tx_id = wallet.broadcast(&signed, TxKind::Payout).await?;
        info!(trade_id = %model.trade.id, payout_tx_id = %tx_id, "Payout published");

        model.payout_tx = Some(signed);
        model.trade.payout_tx_id = Some(tx_id);
        model.set_state(TradeState::SellerPublishedPayoutTx)
    }
}

/// Tell the buyer the payout is published.
pub struct SendPayoutTxPublished;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for SendPayoutTxPublished {
    fn name(&self) -> &'static str {
        "SendPayoutTxPublished"
    }

    async fn run(&self, step: &mut ModelStep<'_>) -> Result<(), ProtocolError> {
        let model = step.model();
        let message = ExchangeMessage::PayoutTxPublished(PayoutTxPublished {
            trade_id: model.trade.id,
            payout_tx_id: required(&model.trade.payout_tx_id, "payout tx id")?,
        });
        send_mailbox_message(model, message, SendStates::PAYOUT_TX_PUBLISHED).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deliver_trigger, run_task, Harness};
    use shared_types::fixtures::offer;
    use shared_types::{
        ErrorKind, FiatTransferStarted, InputSignature, NodeAddress, OfferDirection, OutPoint,
        ProtocolKind, Trade, TradeRole, COIN,
    };

    fn seller_model(harness: &Harness) -> ProcessModel {
        let mut trade = Trade::new(
            offer(OfferDirection::Sell, ProtocolKind::Escrow),
            TradeRole::SellerAsMaker,
            COIN / 2,
            2_000_000,
            NodeAddress::new("buyer", 9999),
        );
        trade.state = TradeState::DepositConfirmedInBlockChain;
        ProcessModel::new(trade, harness.services())
    }

    fn fiat_started(model: &ProcessModel) -> FiatTransferStarted {
        FiatTransferStarted {
            trade_id: model.trade.id,
            buyer_payout_address: "buyer-payout".to_string(),
            buyer_payout_amount: COIN / 2 + COIN / 10,
            seller_payout_amount: COIN / 10,
            buyer_signature: InputSignature {
                outpoint: OutPoint::new("deposit", 0),
                signer: "buyer-key".to_string(),
                signature: "buyer-sig".to_string(),
            },
        }
    }

    async fn rejected(edit: impl FnOnce(&mut FiatTransferStarted)) {
        let harness = Harness::new("seller", 1);
        let mut model = seller_model(&harness);
        let mut message = fiat_started(&model);
        edit(&mut message);
        deliver_trigger(&mut model, "buyer", ExchangeMessage::FiatTransferStarted(message));

        let err = run_task(&mut model, SellerProcessFiatTransferStarted)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(model.trade.state, TradeState::DepositConfirmedInBlockChain);
        assert!(model.peer.payout_signature.is_none());
    }

    #[tokio::test]
    async fn test_zero_payout_amount_rejected() {
        rejected(|m| m.buyer_payout_amount = 0).await;
        rejected(|m| m.seller_payout_amount = 0).await;
    }

    #[tokio::test]
    async fn test_empty_payout_address_rejected() {
        rejected(|m| m.buyer_payout_address = String::new()).await;
    }

    #[tokio::test]
    async fn test_empty_buyer_signature_rejected() {
        rejected(|m| m.buyer_signature.signature = " ".to_string()).await;
        rejected(|m| m.buyer_signature.signer = String::new()).await;
    }
}
