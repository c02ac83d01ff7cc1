//! Sub-states recorded while a mailbox message is delivered.

use shared_types::{NetworkEnvelope, TradeState};

/// The four delivery sub-states of one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStates {
    pub sent: TradeState,
    pub arrived: TradeState,
    pub stored: TradeState,
    pub failed: TradeState,
}

impl SendStates {
    pub const DEPOSIT_TX_INPUTS: Self = Self {
        sent: TradeState::MakerSentDepositTxInputs,
        arrived: TradeState::MakerSawArrivedDepositTxInputs,
        stored: TradeState::MakerStoredInMailboxDepositTxInputs,
        failed: TradeState::MakerSendFailedDepositTxInputs,
    };

    pub const DEPOSIT_TX_PUBLISHED: Self = Self {
        sent: TradeState::TakerSentDepositTxPublishedMsg,
        arrived: TradeState::TakerSawArrivedDepositTxPublishedMsg,
        stored: TradeState::TakerStoredInMailboxDepositTxPublishedMsg,
        failed: TradeState::TakerSendFailedDepositTxPublishedMsg,
    };

    pub const FIAT_PAYMENT_INITIATED: Self = Self {
        sent: TradeState::BuyerSentFiatPaymentInitiatedMsg,
        arrived: TradeState::BuyerSawArrivedFiatPaymentInitiatedMsg,
        stored: TradeState::BuyerStoredInMailboxFiatPaymentInitiatedMsg,
        failed: TradeState::BuyerSendFailedFiatPaymentInitiatedMsg,
    };

    pub const PAYOUT_TX_PUBLISHED: Self = Self {
        sent: TradeState::SellerSentPayoutTxPublishedMsg,
        arrived: TradeState::SellerSawArrivedPayoutTxPublishedMsg,
        stored: TradeState::SellerStoredInMailboxPayoutTxPublishedMsg,
        failed: TradeState::SellerSendFailedPayoutTxPublishedMsg,
    };
}

/// An undelivered message awaiting a manual retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// Resent unchanged, so the peer can drop a duplicate by uid.
    pub envelope: NetworkEnvelope,
    pub states: SendStates,
}
