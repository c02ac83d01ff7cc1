//! Error types for dispute escalation

use shared_types::{NetworkError, ProtocolError, SupportType, TradeId};
use thiserror::Error;

/// Dispute escalation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DisputeError {
    /// No local trade with this id.
    #[error("Trade {trade_id} not found")]
    TradeNotFound { trade_id: TradeId },

    /// The trade has no agent for this support type.
    #[error("No {support_type:?} agent assigned to trade {trade_id}")]
    NoAgent {
        trade_id: TradeId,
        support_type: SupportType,
    },

    /// A dispute of this support type is already stored.
    #[error("We got a dispute msg that we have already stored. trade {trade_id}, {support_type:?}")]
    AlreadyStored {
        trade_id: TradeId,
        support_type: SupportType,
    },

    /// No dispute matches a chat message.
    #[error("No {support_type:?} dispute found for trade {trade_id}")]
    DisputeNotFound {
        trade_id: TradeId,
        support_type: SupportType,
    },

    /// The dispute looks like a replay of another one.
    #[error("Dispute for trade {trade_id} rejected: {reason}")]
    ReplayDetected { trade_id: TradeId, reason: String },

    /// A message that this node does not handle.
    #[error("Unexpected dispute message {0}")]
    UnexpectedMessage(&'static str),

    /// The dispute message could not be sent.
    #[error("Sending dispute message failed: {0}")]
    Network(#[from] NetworkError),

    /// The trade rejected the change.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
