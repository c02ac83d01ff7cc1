//! # Error Types
//!
//! The protocol error taxonomy and the errors of the external capabilities
//! (network, wallet, ledger).

use crate::trade::{DisputeState, TradePhase, TradeState};
use thiserror::Error;

/// How an error must be handled by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range peer data. Fatal to the task sequence.
    Validation,
    /// Send failure or unreachable peer. Retried within a bounded budget.
    TransientNetwork,
    /// Message references context not yet known locally. Retried after a delay.
    ProtocolDesync,
    /// Broken invariant. Fatal, routes the trade to dispute escalation.
    ProtocolViolation,
}

/// Errors from the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The peer could not be reached and no mailbox accepted the message.
    #[error("Peer {peer} unreachable")]
    PeerUnreachable { peer: String },

    /// The send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The network layer is shutting down.
    #[error("Network stopped")]
    Stopped,
}

/// Errors from the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Not enough funds of the requested asset.
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// The transaction is malformed.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// The transaction was rejected at broadcast.
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// Errors from the ledger query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger cannot be queried right now.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by protocol steps.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Peer-supplied data failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An amount is outside its permitted bounds.
    #[error("{what} {amount} out of range [{min}, {max}]")]
    AmountOutOfRange {
        what: &'static str,
        amount: u64,
        min: u64,
        max: u64,
    },

    /// An address does not decode for the expected network.
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A transaction referenced by the peer is not (yet) known to the ledger.
    #[error("Transaction {tx_id} not found")]
    TxNotFound { tx_id: String },

    /// A referenced transaction has an unexpected kind.
    #[error("Transaction {tx_id} has unexpected kind: {reason}")]
    UnexpectedTx { tx_id: String, reason: String },

    /// A context referenced by a message is not available locally.
    #[error("Context not available: {0}")]
    ContextNotAvailable(String),

    /// A state transition would move the trade backwards.
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: TradeState, to: TradeState },

    /// A dispute state transition is not permitted.
    #[error("Invalid dispute state transition from {from:?} to {to:?}")]
    InvalidDisputeTransition { from: DisputeState, to: DisputeState },

    /// A message or action arrived in a phase that does not expect it.
    #[error("{trigger} not expected in phase {phase:?}")]
    UnexpectedTrigger { trigger: String, phase: TradePhase },

    /// The BSQ side of a swap does not conserve value.
    #[error(
        "BSQ balance mismatch: bsq_in {bsq_in} - bsq_out {bsq_out} != bsq_trade_fee {bsq_trade_fee}"
    )]
    BalanceMismatch {
        bsq_in: u64,
        bsq_out: u64,
        bsq_trade_fee: u64,
    },

    /// The BTC side of a swap pays out more than it takes in.
    #[error("Negative transaction fee: btc_in {btc_in} < btc_out {btc_out}")]
    NegativeTxFee { btc_in: u64, btc_out: u64 },

    /// The peer's contract signature does not match our contract.
    #[error("Contract signature mismatch")]
    ContractSignatureMismatch,

    /// Any other broken protocol invariant.
    #[error("Protocol violation: {0}")]
    Violation(String),

    /// The protocol timeout fired.
    #[error("Timeout reached. Protocol did not complete in {0} sec.")]
    Timeout(u64),

    /// Network failure.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Wallet failure.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Local serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::AmountOutOfRange { .. }
            | Self::InvalidAddress { .. }
            | Self::UnexpectedTx { .. }
            | Self::InvalidStateTransition { .. }
            | Self::InvalidDisputeTransition { .. }
            | Self::UnexpectedTrigger { .. }
            | Self::Wallet(_)
            | Self::Serialization(_) => ErrorKind::Validation,
            Self::Network(_) | Self::Ledger(_) | Self::Timeout(_) => ErrorKind::TransientNetwork,
            Self::TxNotFound { .. } | Self::ContextNotAvailable(_) => ErrorKind::ProtocolDesync,
            Self::BalanceMismatch { .. }
            | Self::NegativeTxFee { .. }
            | Self::ContractSignatureMismatch
            | Self::Violation(_) => ErrorKind::ProtocolViolation,
        }
    }

    /// Whether the trade must be routed to dispute escalation.
    #[must_use]
    pub fn requires_escalation(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
