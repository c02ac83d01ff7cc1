//! # Exchange Events
//!
//! Observable effects produced by the protocol subsystems: trade state
//! transitions, failures, dispute escalation. Consumers (UI, notifications,
//! metrics, persistence) subscribe with an `EventFilter`.

use shared_types::{
    AvailabilityResult, DisputeState, ErrorKind, OfferId, TradeId, TradePhase, TradeState,
};

/// Subsystem ids used as event sources.
pub mod source {
    /// Offer availability handshake.
    pub const OFFER_AVAILABILITY: u8 = 2;
    /// Escrow trade protocol.
    pub const TRADE_PROTOCOL: u8 = 3;
    /// BSQ swap protocol.
    pub const BSQ_SWAP: u8 = 4;
    /// Dispute escalation.
    pub const DISPUTE: u8 = 5;
    /// Node runtime.
    pub const RUNTIME: u8 = 0;
}

/// Events published on the exchange event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    /// A trade moved to a new protocol state.
    TradeStateChanged {
        /// Trade.
        trade_id: TradeId,
        /// Previous state.
        from: TradeState,
        /// New state.
        to: TradeState,
        /// Phase of the new state.
        phase: TradePhase,
    },

    /// A task sequence failed; the trade carries the error message.
    TradeFailed {
        /// Trade.
        trade_id: TradeId,
        /// Classification of the failure.
        kind: ErrorKind,
        /// User-visible message.
        error: String,
    },

    /// A mailbox message could not be delivered after the automatic retry.
    TradeSendFailed {
        /// Trade.
        trade_id: TradeId,
        /// Message type.
        message: String,
        /// Last network error.
        error: String,
    },

    /// A mailbox message failed once and is being sent again.
    MessageSendRetried {
        /// Trade.
        trade_id: TradeId,
        /// Message type.
        message: String,
    },

    /// The trade completed its protocol.
    TradeCompleted {
        /// Trade.
        trade_id: TradeId,
    },

    /// The protocol cannot complete autonomously; route to dispute.
    DisputeEscalationRequired {
        /// Trade.
        trade_id: TradeId,
        /// Reason.
        reason: String,
    },

    /// A trade's dispute state changed.
    DisputeStateChanged {
        /// Trade.
        trade_id: TradeId,
        /// New dispute state.
        state: DisputeState,
    },

    /// A dispute result was applied to a trade.
    DisputeResultApplied {
        /// Trade.
        trade_id: TradeId,
        /// Buyer's payout.
        buyer_payout_amount: u64,
        /// Seller's payout.
        seller_payout_amount: u64,
    },

    /// A dispute result message was deferred for a delayed retry.
    DisputeResultDeferred {
        /// Trade.
        trade_id: TradeId,
        /// Retry attempt number.
        attempt: u32,
    },

    /// A dispute result message was dropped after exhausting retries.
    DisputeResultDropped {
        /// Trade.
        trade_id: TradeId,
    },

    /// An availability check finished.
    OfferAvailabilityChecked {
        /// Offer.
        offer_id: OfferId,
        /// Result.
        result: AvailabilityResult,
    },

    /// Unrecoverable internal error, routed to the dead letter queue.
    CriticalError {
        /// Source subsystem.
        subsystem_id: u8,
        /// Error description.
        error: String,
    },
}

impl ExchangeEvent {
    /// Topic the event belongs to.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::TradeStateChanged { .. }
            | Self::TradeFailed { .. }
            | Self::TradeSendFailed { .. }
            | Self::MessageSendRetried { .. }
            | Self::TradeCompleted { .. } => EventTopic::Trade,
            Self::DisputeEscalationRequired { .. }
            | Self::DisputeStateChanged { .. }
            | Self::DisputeResultApplied { .. }
            | Self::DisputeResultDeferred { .. }
            | Self::DisputeResultDropped { .. } => EventTopic::Dispute,
            Self::OfferAvailabilityChecked { .. } => EventTopic::Offer,
            Self::CriticalError { .. } => EventTopic::DeadLetterQueue,
        }
    }

    /// Subsystem that produced the event.
    #[must_use]
    pub fn source_subsystem(&self) -> u8 {
        match self {
            Self::TradeStateChanged { .. }
            | Self::TradeFailed { .. }
            | Self::TradeSendFailed { .. }
            | Self::MessageSendRetried { .. }
            | Self::TradeCompleted { .. }
            | Self::DisputeEscalationRequired { .. } => source::TRADE_PROTOCOL,
            Self::DisputeStateChanged { .. }
            | Self::DisputeResultApplied { .. }
            | Self::DisputeResultDeferred { .. }
            | Self::DisputeResultDropped { .. } => source::DISPUTE,
            Self::OfferAvailabilityChecked { .. } => source::OFFER_AVAILABILITY,
            Self::CriticalError { subsystem_id, .. } => *subsystem_id,
        }
    }

    /// Trade the event refers to, if any.
    #[must_use]
    pub fn trade_id(&self) -> Option<TradeId> {
        match self {
            Self::TradeStateChanged { trade_id, .. }
            | Self::TradeFailed { trade_id, .. }
            | Self::TradeSendFailed { trade_id, .. }
            | Self::MessageSendRetried { trade_id, .. }
            | Self::TradeCompleted { trade_id }
            | Self::DisputeEscalationRequired { trade_id, .. }
            | Self::DisputeStateChanged { trade_id, .. }
            | Self::DisputeResultApplied { trade_id, .. }
            | Self::DisputeResultDeferred { trade_id, .. }
            | Self::DisputeResultDropped { trade_id } => Some(*trade_id),
            Self::OfferAvailabilityChecked { .. } | Self::CriticalError { .. } => None,
        }
    }
}

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// Trade protocol progress and failures.
    Trade,
    /// Dispute escalation.
    Dispute,
    /// Offer availability.
    Offer,
    /// Dead Letter Queue for critical errors.
    DeadLetterQueue,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Source subsystems to include. Empty means all sources.
    pub source_subsystems: Vec<u8>,
    /// Restrict to one trade.
    pub trade_id: Option<TradeId>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            ..Self::default()
        }
    }

    /// Create a filter for events from specific subsystems.
    #[must_use]
    pub fn from_subsystems(subsystems: Vec<u8>) -> Self {
        Self {
            source_subsystems: subsystems,
            ..Self::default()
        }
    }

    /// Create a filter for events of one trade.
    #[must_use]
    pub fn trade(trade_id: TradeId) -> Self {
        Self {
            trade_id: Some(trade_id),
            ..Self::default()
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &ExchangeEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let source_match = self.source_subsystems.is_empty()
            || self.source_subsystems.contains(&event.source_subsystem());

        let trade_match = self
            .trade_id
            .map_or(true, |id| event.trade_id() == Some(id));

        topic_match && source_match && trade_match
    }
}
