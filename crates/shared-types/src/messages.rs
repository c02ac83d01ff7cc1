//! # Message Catalogue
//!
//! Logical payloads exchanged between peers. Every payload that belongs to
//! a trade carries the trade id; the envelope carries the unique message id.

use crate::entities::{NodeAddress, OfferId, TradeId};
use crate::trade::{DisputePayout, SupportType};
use crate::transaction::{InputSignature, PartiallySignedTx, TxInput, TxOutput};
use serde::{Deserialize, Serialize};

/// Outcome of an offer availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityResult {
    Available,
    OfferTaken,
    PriceOutOfTolerance,
    MarketPriceNotAvailable,
    NoArbitrators,
    NoMediators,
    UserIgnored,
    MissingMandatoryCapability,
    UnknownFailure,
    Timeout,
}

impl AvailabilityResult {
    /// Whether the offer can be taken.
    #[must_use]
    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

/// Taker asks the maker whether an offer is still takeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAvailabilityRequest {
    pub offer_id: OfferId,
    pub takers_trade_price: u64,
    pub taker_pub_key: String,
    pub supported_capabilities: Vec<String>,
}

/// Maker's answer to an availability request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAvailabilityResponse {
    pub offer_id: OfferId,
    pub result: AvailabilityResult,
    pub mediator: Option<NodeAddress>,
    pub refund_agent: Option<NodeAddress>,
}

/// Taker's opening message of an escrow trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputsForDepositTxRequest {
    pub trade_id: TradeId,
    pub trade_amount: u64,
    pub trade_price: u64,
    pub taker_fee_tx_id: String,
    pub taker_inputs: Vec<TxInput>,
    pub taker_change_address: String,
    pub taker_payout_address: String,
    pub taker_account_id: String,
    pub taker_payment_method_id: String,
    pub taker_signing_pub_key: String,
    pub mediator: Option<NodeAddress>,
    pub refund_agent: Option<NodeAddress>,
}

/// Maker's answer: its inputs, the deposit transaction with the maker's
/// signatures and the maker's contract signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputsForDepositTxResponse {
    pub trade_id: TradeId,
    pub maker_inputs: Vec<TxInput>,
    pub maker_payout_address: String,
    pub maker_account_id: String,
    pub maker_signing_pub_key: String,
    pub maker_contract_signature: String,
    pub deposit_tx: PartiallySignedTx,
}

/// Taker published the deposit transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTxPublished {
    pub trade_id: TradeId,
    /// `None` is a protocol violation, not missing data.
    pub deposit_tx_id: Option<String>,
    pub taker_contract_signature: String,
}

/// Buyer started the external payment and hands over its payout signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatTransferStarted {
    pub trade_id: TradeId,
    pub buyer_payout_address: String,
    pub buyer_payout_amount: u64,
    pub seller_payout_amount: u64,
    pub buyer_signature: InputSignature,
}

/// Seller published the payout transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTxPublished {
    pub trade_id: TradeId,
    pub payout_tx_id: String,
}

/// Taker's opening message of a BSQ swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSwapTxRequest {
    pub trade_id: TradeId,
    pub trade_amount: u64,
    pub trade_price: u64,
    pub bsq_trade_amount: u64,
    pub taker_inputs: Vec<TxInput>,
    pub taker_outputs: Vec<TxOutput>,
    /// Taker's receive address (BSQ when the taker sells BTC, BTC otherwise).
    pub taker_receive_address: String,
    pub tx_fee_per_party: u64,
}

/// Maker's reconciled and partially signed swap transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSwapTxResponse {
    pub trade_id: TradeId,
    pub tx: PartiallySignedTx,
}

/// Taker published the swap transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTxPublished {
    pub trade_id: TradeId,
    pub tx_id: String,
}

/// Dispute details exchanged with the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeInfo {
    pub trade_id: TradeId,
    pub support_type: SupportType,
    pub opener: NodeAddress,
    pub deposit_tx_id: Option<String>,
    pub delayed_payout_tx_id: Option<String>,
    pub contract_hash: Option<String>,
    pub opened_at: u64,
}

/// A dispute chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub uid: String,
    pub trade_id: TradeId,
    pub sender_is_trader: bool,
    pub text: String,
    pub date: u64,
}

/// The agent's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResult {
    pub trade_id: TradeId,
    pub support_type: SupportType,
    pub payout: DisputePayout,
    pub summary_notes: String,
    pub chat_message: ChatMessage,
}

/// Trader to agent: open a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeOpened {
    pub dispute: DisputeInfo,
}

/// Agent to the other trader: the peer opened a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOpenedDispute {
    pub dispute: DisputeInfo,
}

/// Agent to trader: the dispute result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResultMessage {
    pub result: DisputeResult,
}

/// Chat line inside a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeChat {
    pub chat: ChatMessage,
    pub support_type: SupportType,
}

/// Receipt for a processed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub source_uid: crate::entities::MessageUid,
    pub source_msg: String,
    /// Trade or offer id the source message belongs to.
    pub source_id: String,
    pub success: bool,
    pub error_message: Option<String>,
}

/// All messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeMessage {
    OfferAvailabilityRequest(OfferAvailabilityRequest),
    OfferAvailabilityResponse(OfferAvailabilityResponse),
    InputsForDepositTxRequest(InputsForDepositTxRequest),
    InputsForDepositTxResponse(InputsForDepositTxResponse),
    DepositTxPublished(DepositTxPublished),
    FiatTransferStarted(FiatTransferStarted),
    PayoutTxPublished(PayoutTxPublished),
    CreateSwapTxRequest(CreateSwapTxRequest),
    CreateSwapTxResponse(CreateSwapTxResponse),
    SwapTxPublished(SwapTxPublished),
    DisputeOpened(DisputeOpened),
    PeerOpenedDispute(PeerOpenedDispute),
    DisputeChat(DisputeChat),
    DisputeResult(DisputeResultMessage),
    Ack(AckMessage),
}

impl ExchangeMessage {
    /// Message type name, used in logs and acks.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfferAvailabilityRequest(_) => "OfferAvailabilityRequest",
            Self::OfferAvailabilityResponse(_) => "OfferAvailabilityResponse",
            Self::InputsForDepositTxRequest(_) => "InputsForDepositTxRequest",
            Self::InputsForDepositTxResponse(_) => "InputsForDepositTxResponse",
            Self::DepositTxPublished(_) => "DepositTxPublished",
            Self::FiatTransferStarted(_) => "FiatTransferStarted",
            Self::PayoutTxPublished(_) => "PayoutTxPublished",
            Self::CreateSwapTxRequest(_) => "CreateSwapTxRequest",
            Self::CreateSwapTxResponse(_) => "CreateSwapTxResponse",
            Self::SwapTxPublished(_) => "SwapTxPublished",
            Self::DisputeOpened(_) => "DisputeOpened",
            Self::PeerOpenedDispute(_) => "PeerOpenedDispute",
            Self::DisputeChat(_) => "DisputeChat",
            Self::DisputeResult(_) => "DisputeResult",
            Self::Ack(_) => "Ack",
        }
    }

    /// Trade id for trade-scoped messages.
    #[must_use]
    pub fn trade_id(&self) -> Option<TradeId> {
        match self {
            Self::InputsForDepositTxRequest(m) => Some(m.trade_id),
            Self::InputsForDepositTxResponse(m) => Some(m.trade_id),
            Self::DepositTxPublished(m) => Some(m.trade_id),
            Self::FiatTransferStarted(m) => Some(m.trade_id),
            Self::PayoutTxPublished(m) => Some(m.trade_id),
            Self::CreateSwapTxRequest(m) => Some(m.trade_id),
            Self::CreateSwapTxResponse(m) => Some(m.trade_id),
            Self::SwapTxPublished(m) => Some(m.trade_id),
            Self::DisputeOpened(m) => Some(m.dispute.trade_id),
            Self::PeerOpenedDispute(m) => Some(m.dispute.trade_id),
            Self::DisputeChat(m) => Some(m.chat.trade_id),
            Self::DisputeResult(m) => Some(m.result.trade_id),
            Self::OfferAvailabilityRequest(_)
            | Self::OfferAvailabilityResponse(_)
            | Self::Ack(_) => None,
        }
    }

    /// Id the message refers to (trade id, or offer id for availability messages).
    #[must_use]
    pub fn source_id(&self) -> String {
        match self {
            Self::OfferAvailabilityRequest(m) => m.offer_id.to_string(),
            Self::OfferAvailabilityResponse(m) => m.offer_id.to_string(),
            Self::Ack(m) => m.source_id.clone(),
            other => other
                .trade_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
        }
    }

    /// Whether the message is handled by the trade protocol of its trade.
    #[must_use]
    pub fn is_trade_protocol_message(&self) -> bool {
        matches!(
            self,
            Self::InputsForDepositTxRequest(_)
                | Self::InputsForDepositTxResponse(_)
                | Self::DepositTxPublished(_)
                | Self::FiatTransferStarted(_)
                | Self::PayoutTxPublished(_)
                | Self::CreateSwapTxRequest(_)
                | Self::CreateSwapTxResponse(_)
                | Self::SwapTxPublished(_)
        )
    }
}
