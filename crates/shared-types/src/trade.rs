//! # Trade
//!
//! The trade entity and its two independent state axes: the protocol
//! progress (`TradeState`, grouped into ordered `TradePhase`s) and the
//! arbitration escalation (`DisputeState`).

use crate::contract::Contract;
use crate::entities::{NodeAddress, Offer, OfferDirection, ProtocolKind, TradeId};
use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Role of the local party in a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeRole {
    /// Buys BTC, published the offer.
    BuyerAsMaker,
    /// Buys BTC, took the offer.
    BuyerAsTaker,
    /// Sells BTC, published the offer.
    SellerAsMaker,
    /// Sells BTC, took the offer.
    SellerAsTaker,
}

impl TradeRole {
    /// Role of the maker of an offer with the given direction.
    #[must_use]
    pub fn maker_for(direction: OfferDirection) -> Self {
        match direction {
            OfferDirection::Buy => Self::BuyerAsMaker,
            OfferDirection::Sell => Self::SellerAsMaker,
        }
    }

    /// Role of the taker of an offer with the given direction.
    #[must_use]
    pub fn taker_for(direction: OfferDirection) -> Self {
        match direction {
            OfferDirection::Buy => Self::SellerAsTaker,
            OfferDirection::Sell => Self::BuyerAsTaker,
        }
    }

    /// Whether the local party published the offer.
    #[must_use]
    pub fn is_maker(self) -> bool {
        matches!(self, Self::BuyerAsMaker | Self::SellerAsMaker)
    }

    /// Whether the local party buys BTC.
    #[must_use]
    pub fn is_buyer(self) -> bool {
        matches!(self, Self::BuyerAsMaker | Self::BuyerAsTaker)
    }
}

/// Coarse, totally ordered protocol progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradePhase {
    Init,
    TakerFeePublished,
    DepositPublished,
    DepositConfirmed,
    FiatSent,
    FiatReceived,
    PayoutPublished,
    Withdrawn,
}

/// Fine grained protocol progress.
///
/// Escrow states cover the send sub-states (`Sent`, `SawArrived`,
/// `StoredInMailbox`, `SendFailed`) of every mailbox message. Swap states
/// form their own set; a trade never crosses between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    // Escrow: Init
    Preparation,

    // Escrow: TakerFeePublished
    TakerPublishedTakerFeeTx,
    MakerSentDepositTxInputs,
    MakerSawArrivedDepositTxInputs,
    MakerStoredInMailboxDepositTxInputs,
    MakerSendFailedDepositTxInputs,
    TakerReceivedDepositTxInputs,

    // Escrow: DepositPublished
    TakerPublishedDepositTx,
    TakerSentDepositTxPublishedMsg,
    TakerSawArrivedDepositTxPublishedMsg,
    TakerStoredInMailboxDepositTxPublishedMsg,
    TakerSendFailedDepositTxPublishedMsg,
    MakerReceivedDepositTxPublishedMsg,

    // Escrow: DepositConfirmed
    DepositConfirmedInBlockChain,

    // Escrow: FiatSent
    BuyerConfirmedFiatPaymentInitiated,
    BuyerSentFiatPaymentInitiatedMsg,
    BuyerSawArrivedFiatPaymentInitiatedMsg,
    BuyerStoredInMailboxFiatPaymentInitiatedMsg,
    BuyerSendFailedFiatPaymentInitiatedMsg,
    SellerReceivedFiatPaymentInitiatedMsg,

    // Escrow: FiatReceived
    SellerConfirmedFiatPaymentReceipt,

    // Escrow: PayoutPublished
    SellerPublishedPayoutTx,
    SellerSentPayoutTxPublishedMsg,
    SellerSawArrivedPayoutTxPublishedMsg,
    SellerStoredInMailboxPayoutTxPublishedMsg,
    SellerSendFailedPayoutTxPublishedMsg,
    BuyerReceivedPayoutTxPublishedMsg,

    // Escrow: Withdrawn
    WithdrawCompleted,

    // Swap
    SwapPreparation,
    SwapTakerSentCreateTxRequest,
    SwapMakerSignedTx,
    SwapTxPublished,
    SwapCompleted,
}

impl TradeState {
    /// Phase the state belongs to.
    #[must_use]
    pub fn phase(self) -> TradePhase {
        use TradeState::*;
        match self {
            Preparation | SwapPreparation | SwapTakerSentCreateTxRequest | SwapMakerSignedTx => {
                TradePhase::Init
            }
            TakerPublishedTakerFeeTx
            | MakerSentDepositTxInputs
            | MakerSawArrivedDepositTxInputs
            | MakerStoredInMailboxDepositTxInputs
            | MakerSendFailedDepositTxInputs
            | TakerReceivedDepositTxInputs => TradePhase::TakerFeePublished,
            TakerPublishedDepositTx
            | TakerSentDepositTxPublishedMsg
            | TakerSawArrivedDepositTxPublishedMsg
            | TakerStoredInMailboxDepositTxPublishedMsg
            | TakerSendFailedDepositTxPublishedMsg
            | MakerReceivedDepositTxPublishedMsg => TradePhase::DepositPublished,
            DepositConfirmedInBlockChain => TradePhase::DepositConfirmed,
            BuyerConfirmedFiatPaymentInitiated
            | BuyerSentFiatPaymentInitiatedMsg
            | BuyerSawArrivedFiatPaymentInitiatedMsg
            | BuyerStoredInMailboxFiatPaymentInitiatedMsg
            | BuyerSendFailedFiatPaymentInitiatedMsg
            | SellerReceivedFiatPaymentInitiatedMsg => TradePhase::FiatSent,
            SellerConfirmedFiatPaymentReceipt => TradePhase::FiatReceived,
            SellerPublishedPayoutTx
            | SellerSentPayoutTxPublishedMsg
            | SellerSawArrivedPayoutTxPublishedMsg
            | SellerStoredInMailboxPayoutTxPublishedMsg
            | SellerSendFailedPayoutTxPublishedMsg
            | BuyerReceivedPayoutTxPublishedMsg
            | SwapTxPublished => TradePhase::PayoutPublished,
            WithdrawCompleted | SwapCompleted => TradePhase::Withdrawn,
        }
    }

    /// Protocol the state belongs to.
    #[must_use]
    pub fn protocol(self) -> ProtocolKind {
        use TradeState::*;
        match self {
            SwapPreparation | SwapTakerSentCreateTxRequest | SwapMakerSignedTx
            | SwapTxPublished | SwapCompleted => ProtocolKind::BsqSwap,
            _ => ProtocolKind::Escrow,
        }
    }

    /// Valid when the protocol matches and the phase does not go backwards.
    #[must_use]
    pub fn is_valid_transition_to(self, new: TradeState) -> bool {
        self.protocol() == new.protocol() && new.phase() >= self.phase()
    }

    /// Whether the state is a failed mailbox send awaiting a manual retry.
    #[must_use]
    pub fn is_send_failed(self) -> bool {
        matches!(
            self,
            Self::MakerSendFailedDepositTxInputs
                | Self::TakerSendFailedDepositTxPublishedMsg
                | Self::BuyerSendFailedFiatPaymentInitiatedMsg
                | Self::SellerSendFailedPayoutTxPublishedMsg
        )
    }

    /// Initial state for a protocol.
    #[must_use]
    pub fn initial(protocol: ProtocolKind) -> Self {
        match protocol {
            ProtocolKind::Escrow => Self::Preparation,
            ProtocolKind::BsqSwap => Self::SwapPreparation,
        }
    }
}

/// Kind of dispute agent handling a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportType {
    Mediation,
    Refund,
    Arbitration,
}

/// Arbitration escalation of a trade, independent of `TradeState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisputeState {
    #[default]
    NoDispute,
    /// We opened the dispute.
    Requested(SupportType),
    /// Our peer opened the dispute.
    StartedByPeer(SupportType),
    /// The agent published a result.
    Closed(SupportType),
}

impl DisputeState {
    /// Check if transition to `new` is valid.
    #[must_use]
    pub fn can_transition_to(&self, new: &DisputeState) -> bool {
        use DisputeState::*;
        match (self, new) {
            (NoDispute, Requested(_) | StartedByPeer(_)) => true,
            (Requested(a) | StartedByPeer(a), Closed(b)) => a == b,
            // A closed mediation may be escalated to the refund agent.
            (Closed(SupportType::Mediation), Requested(SupportType::Refund))
            | (Closed(SupportType::Mediation), StartedByPeer(SupportType::Refund)) => true,
            _ => false,
        }
    }

    /// Whether a dispute is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Requested(_) | Self::StartedByPeer(_))
    }

    /// Support type of the current dispute, if any.
    #[must_use]
    pub fn support_type(&self) -> Option<SupportType> {
        match self {
            Self::NoDispute => None,
            Self::Requested(t) | Self::StartedByPeer(t) | Self::Closed(t) => Some(*t),
        }
    }
}

/// Final payout split decided by a dispute agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputePayout {
    pub buyer_payout_amount: u64,
    pub seller_payout_amount: u64,
    pub payout_tx_id: Option<String>,
}

/// A trade between the local party and one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub offer: Offer,
    pub role: TradeRole,
    /// Trade amount in satoshis.
    pub amount: u64,
    /// Trade price, counter-currency units per BTC.
    pub price: u64,
    pub peer: NodeAddress,
    pub state: TradeState,
    pub dispute_state: DisputeState,
    pub taker_fee_tx_id: Option<String>,
    pub deposit_tx_id: Option<String>,
    pub payout_tx_id: Option<String>,
    pub swap_tx_id: Option<String>,
    pub contract: Option<Contract>,
    pub contract_hash: Option<String>,
    pub maker_contract_signature: Option<String>,
    pub taker_contract_signature: Option<String>,
    pub mediator: Option<NodeAddress>,
    pub refund_agent: Option<NodeAddress>,
    pub dispute_payout: Option<DisputePayout>,
    pub error_message: Option<String>,
    pub created_at: u64,
}

impl Trade {
    /// Create a new trade in the initial state of its offer's protocol.
    #[must_use]
    pub fn new(offer: Offer, role: TradeRole, amount: u64, price: u64, peer: NodeAddress) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: TradeId::for_offer(&offer.id),
            state: TradeState::initial(offer.protocol),
            offer,
            role,
            amount,
            price,
            peer,
            dispute_state: DisputeState::NoDispute,
            taker_fee_tx_id: None,
            deposit_tx_id: None,
            payout_tx_id: None,
            swap_tx_id: None,
            contract: None,
            contract_hash: None,
            maker_contract_signature: None,
            taker_contract_signature: None,
            mediator: None,
            refund_agent: None,
            dispute_payout: None,
            error_message: None,
            created_at,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TradePhase {
        self.state.phase()
    }

    /// Protocol settling this trade.
    #[must_use]
    pub fn protocol(&self) -> ProtocolKind {
        self.offer.protocol
    }

    /// Advance to `new`; the phase may never decrease.
    pub fn set_state(&mut self, new: TradeState) -> Result<(), ProtocolError> {
        if !self.state.is_valid_transition_to(new) {
            return Err(ProtocolError::InvalidStateTransition {
                from: self.state,
                to: new,
            });
        }
        self.state = new;
        Ok(())
    }

    /// Reset after the deposit transaction vanished from the ledger (reorg).
    ///
    /// The only backwards move: a trade in the `DepositConfirmed` phase goes
    /// back to `TakerPublishedDepositTx` and waits for confirmations again.
    /// Returns whether a reset happened.
    pub fn reset_to_deposit_checkpoint(&mut self) -> bool {
        if self.phase() != TradePhase::DepositConfirmed {
            return false;
        }
        self.state = TradeState::TakerPublishedDepositTx;
        true
    }

    /// Move the dispute axis to `new`.
    pub fn set_dispute_state(&mut self, new: DisputeState) -> Result<(), ProtocolError> {
        if !self.dispute_state.can_transition_to(&new) {
            return Err(ProtocolError::InvalidDisputeTransition {
                from: self.dispute_state,
                to: new,
            });
        }
        self.dispute_state = new;
        Ok(())
    }

    /// Record the dispute payout. Returns `false` if one was already recorded.
    pub fn record_dispute_payout(&mut self, payout: DisputePayout) -> bool {
        if self.dispute_payout.is_some() {
            return false;
        }
        if let Some(tx_id) = &payout.payout_tx_id {
            self.payout_tx_id = Some(tx_id.clone());
        }
        self.dispute_payout = Some(payout);
        true
    }

    /// Whether no more protocol messages are expected.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.phase() >= TradePhase::PayoutPublished
            || (matches!(self.dispute_state, DisputeState::Closed(_))
                && self.dispute_payout.is_some())
    }

    /// Buyer security deposit.
    #[must_use]
    pub fn buyer_security_deposit(&self) -> u64 {
        self.offer.buyer_security_deposit
    }

    /// Seller security deposit.
    #[must_use]
    pub fn seller_security_deposit(&self) -> u64 {
        self.offer.seller_security_deposit
    }

    /// Value locked in the escrow deposit output.
    #[must_use]
    pub fn deposit_amount(&self) -> u64 {
        self.amount + self.buyer_security_deposit() + self.seller_security_deposit()
    }

    /// The amount the local party contributes to the escrow deposit.
    #[must_use]
    pub fn my_deposit_contribution(&self) -> u64 {
        if self.role.is_buyer() {
            self.buyer_security_deposit()
        } else {
            self.amount + self.seller_security_deposit()
        }
    }

    /// The amount the peer contributes to the escrow deposit.
    #[must_use]
    pub fn peer_deposit_contribution(&self) -> u64 {
        self.deposit_amount() - self.my_deposit_contribution()
    }
}
