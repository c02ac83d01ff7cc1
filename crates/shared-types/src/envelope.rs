//! # `NetworkEnvelope`
//!
//! The wrapper for every message exchanged between peers.
//!
//! - **Identity**: `sender` is the authoritative origin of the message.
//! - **De-duplication**: delivery is at-least-once; `uid` lets the receiver
//!   drop repeats.
//! - **Acknowledgement**: acks reference the `uid` of the acked message.

use crate::entities::{MessageUid, NodeAddress};
use crate::messages::{AckMessage, ExchangeMessage};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The envelope of a peer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEnvelope {
    /// Protocol version for forward compatibility.
    pub version: u16,
    /// Unique message id.
    pub uid: MessageUid,
    /// Sender's address.
    pub sender: NodeAddress,
    /// Unix timestamp (seconds) at creation.
    pub created_at: u64,
    /// Payload.
    pub message: ExchangeMessage,
}

impl NetworkEnvelope {
    /// Current protocol version.
    pub const CURRENT_VERSION: u16 = 1;

    /// Wrap `message` in a fresh envelope.
    #[must_use]
    pub fn new(sender: NodeAddress, message: ExchangeMessage) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            uid: MessageUid::new(),
            sender,
            created_at: now_secs(),
            message,
        }
    }

    /// Build the ack for this envelope.
    #[must_use]
    pub fn ack(&self, sender: NodeAddress, success: bool, error_message: Option<String>) -> Self {
        Self::new(
            sender,
            ExchangeMessage::Ack(AckMessage {
                source_uid: self.uid,
                source_msg: self.message.name().to_string(),
                source_id: self.message.source_id(),
                success,
                error_message,
            }),
        )
    }

    /// Message type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.message.name()
    }
}

/// Current unix time in seconds.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TradeId;
    use crate::messages::PayoutTxPublished;
    use uuid::Uuid;

    #[test]
    fn test_ack_references_source() {
        let trade_id = TradeId(Uuid::new_v4());
        let env = NetworkEnvelope::new(
            NodeAddress::new("a", 1),
            ExchangeMessage::PayoutTxPublished(PayoutTxPublished {
                trade_id,
                payout_tx_id: "tx".into(),
            }),
        );
        let ack = env.ack(NodeAddress::new("b", 2), false, Some("boom".into()));

        let ExchangeMessage::Ack(ack_msg) = ack.message else {
            panic!("expected ack");
        };
        assert_eq!(ack_msg.source_uid, env.uid);
        assert_eq!(ack_msg.source_msg, "PayoutTxPublished");
        assert_eq!(ack_msg.source_id, trade_id.to_string());
        assert!(!ack_msg.success);
        assert_ne!(ack.uid, env.uid);
    }
}
