//! # Protocol Context
//!
//! Everything a trade's tasks read and write: the trade itself, what the
//! peer told us, our own inputs and addresses, the transactions under
//! construction and the collaborators the tasks call into.
//!
//! One `ProcessModel` per trade, owned by that trade's protocol actor.
//! Tasks receive it mutably, one at a time.

use crate::config::ProtocolConfig;
use crate::domain::send_states::PendingSend;
use shared_bus::EventPublisher;
use shared_crypto::KeyRing;
use shared_types::ports::{LedgerQuery, MessageBus, PersistenceRequester, TradeWallet};
use shared_types::{
    ExchangeMessage, InputSignature, NetworkEnvelope, OutPoint, PartiallySignedTx, ProtocolError,
    Trade, TradeState, TxInput, TxOutput,
};
use std::sync::Arc;

/// Collaborators shared by all trades of a node.
#[derive(Clone)]
pub struct ProtocolServices {
    pub bus: Arc<dyn MessageBus>,
    pub wallet: Arc<dyn TradeWallet>,
    pub ledger: Arc<dyn LedgerQuery>,
    pub persistence: Arc<dyn PersistenceRequester>,
    pub events: Arc<dyn EventPublisher>,
    pub key_ring: Arc<KeyRing>,
    /// Payment account used in contracts.
    pub account_id: String,
    pub config: ProtocolConfig,
}

/// What we learned about the trading peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingPeer {
    pub account_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub signing_pub_key: Option<String>,
    pub payout_address: Option<String>,
    pub change_address: Option<String>,
    pub receive_address: Option<String>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub contract_signature: Option<String>,
    pub payout_amount: Option<u64>,
    pub payout_signature: Option<InputSignature>,
}

impl TradingPeer {
    /// Outpoints of the peer's inputs.
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|i| i.outpoint.clone()).collect()
    }
}

/// Swap terms agreed for a BSQ swap trade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapTerms {
    /// BSQ paid for the BTC amount.
    pub bsq_trade_amount: u64,
    /// Maker's and taker's BSQ trade fee combined.
    pub bsq_trade_fee: u64,
    /// Mining fee each party pays, in satoshis.
    pub tx_fee_per_party: u64,
    /// Our own outputs (payment and change).
    pub my_outputs: Vec<TxOutput>,
    /// Our receive address for the traded asset.
    pub my_receive_address: Option<String>,
}

/// The Protocol Context of one trade.
pub struct ProcessModel {
    pub trade: Trade,
    pub peer: TradingPeer,
    pub my_inputs: Vec<TxInput>,
    pub my_change_address: Option<String>,
    pub my_payout_address: Option<String>,
    pub deposit_tx: Option<PartiallySignedTx>,
    pub payout_tx: Option<PartiallySignedTx>,
    pub swap_tx: Option<PartiallySignedTx>,
    pub swap: SwapTerms,
    /// Envelope currently being processed.
    pub trigger: Option<NetworkEnvelope>,
    /// Message whose delivery failed, kept for a manual retry.
    pub pending_send: Option<PendingSend>,
    pub services: ProtocolServices,
    transitions: Vec<(TradeState, TradeState)>,
}

impl ProcessModel {
    pub fn new(trade: Trade, services: ProtocolServices) -> Self {
        Self {
            trade,
            peer: TradingPeer::default(),
            my_inputs: Vec::new(),
            my_change_address: None,
            my_payout_address: None,
            deposit_tx: None,
            payout_tx: None,
            swap_tx: None,
            swap: SwapTerms::default(),
            trigger: None,
            pending_send: None,
            services,
            transitions: Vec::new(),
        }
    }

    /// Advance the trade state and remember the transition for publishing.
    pub fn set_state(&mut self, new: TradeState) -> Result<(), ProtocolError> {
        let from = self.trade.state;
        self.trade.set_state(new)?;
        if from != new {
            self.transitions.push((from, new));
        }
        Ok(())
    }

    /// Record a transition made outside `set_state`.
    pub(crate) fn note_transition(&mut self, from: TradeState, to: TradeState) {
        self.transitions.push((from, to));
    }

    /// Transitions since the last call.
    pub fn take_transitions(&mut self) -> Vec<(TradeState, TradeState)> {
        std::mem::take(&mut self.transitions)
    }

    /// Payload of the envelope being processed.
    pub fn trigger_message(&self) -> Result<&ExchangeMessage, ProtocolError> {
        self.trigger
            .as_ref()
            .map(|env| &env.message)
            .ok_or_else(|| ProtocolError::ContextNotAvailable("no inbound message".to_string()))
    }

    /// Outpoints of our own inputs.
    pub fn my_outpoints(&self) -> Vec<OutPoint> {
        self.my_inputs.iter().map(|i| i.outpoint.clone()).collect()
    }

    /// Our payout address, or a context error.
    pub fn require_my_payout_address(&self) -> Result<String, ProtocolError> {
        self.my_payout_address
            .clone()
            .ok_or_else(|| ProtocolError::ContextNotAvailable("own payout address".to_string()))
    }
}

/// Pull a field out of the model or fail with a context error.
pub fn required<T: Clone>(value: &Option<T>, what: &str) -> Result<T, ProtocolError> {
    value
        .clone()
        .ok_or_else(|| ProtocolError::ContextNotAvailable(what.to_string()))
}

/// Reject empty string fields received from the peer.
pub fn non_empty(value: &str, field: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
