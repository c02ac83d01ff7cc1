//! Driven Ports (what dispute escalation needs from the rest of the node)

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{DisputePayout, DisputeState, OfferId, ProtocolError, Trade, TradeId};
use std::collections::{HashMap, HashSet};

/// Access to the local trades.
#[async_trait]
pub trait TradeRegistry: Send + Sync {
    /// Snapshot of a trade.
    async fn trade(&self, trade_id: &TradeId) -> Option<Trade>;

    /// Move the trade's dispute state.
    async fn set_dispute_state(
        &self,
        trade_id: &TradeId,
        state: DisputeState,
    ) -> Result<(), ProtocolError>;

    /// Record the agent's payout. Returns `false` if one was already recorded.
    async fn apply_dispute_payout(
        &self,
        trade_id: &TradeId,
        payout: DisputePayout,
    ) -> Result<bool, ProtocolError>;

    /// Move the trade to the closed/disputed storage. Idempotent.
    async fn close_disputed_trade(&self, trade_id: &TradeId);
}

/// The maker's open offers.
pub trait OpenOfferRegistry: Send + Sync {
    /// Close the offer if it is still open. Returns whether it was.
    fn close_open_offer(&self, offer_id: &OfferId) -> bool;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Trades held in memory. For tests.
#[derive(Debug, Default)]
pub struct MockTradeRegistry {
    trades: RwLock<HashMap<TradeId, Trade>>,
    closed: RwLock<Vec<TradeId>>,
}

impl MockTradeRegistry {
    pub fn add(&self, trade: Trade) {
        self.trades.write().insert(trade.id, trade);
    }

    pub fn get(&self, trade_id: &TradeId) -> Option<Trade> {
        self.trades.read().get(trade_id).cloned()
    }

    /// Trades closed so far, one entry per close call.
    pub fn closed(&self) -> Vec<TradeId> {
        self.closed.read().clone()
    }
}

#[async_trait]
impl TradeRegistry for MockTradeRegistry {
    async fn trade(&self, trade_id: &TradeId) -> Option<Trade> {
        self.get(trade_id)
    }

    async fn set_dispute_state(
        &self,
        trade_id: &TradeId,
        state: DisputeState,
    ) -> Result<(), ProtocolError> {
        let mut trades = self.trades.write();
        let trade = trades
            .get_mut(trade_id)
            .ok_or_else(|| ProtocolError::ContextNotAvailable(format!("trade {trade_id}")))?;
        trade.set_dispute_state(state)
    }

    async fn apply_dispute_payout(
        &self,
        trade_id: &TradeId,
        payout: DisputePayout,
    ) -> Result<bool, ProtocolError> {
        let mut trades = self.trades.write();
        let trade = trades
            .get_mut(trade_id)
            .ok_or_else(|| ProtocolError::ContextNotAvailable(format!("trade {trade_id}")))?;
        Ok(trade.record_dispute_payout(payout))
    }

    async fn close_disputed_trade(&self, trade_id: &TradeId) {
        self.closed.write().push(*trade_id);
    }
}

/// Open offer ids held in memory. For tests.
#[derive(Debug, Default)]
pub struct MockOpenOffers {
    open: RwLock<HashSet<OfferId>>,
}

impl MockOpenOffers {
    pub fn add(&self, offer_id: OfferId) {
        self.open.write().insert(offer_id);
    }

    pub fn is_open(&self, offer_id: &OfferId) -> bool {
        self.open.read().contains(offer_id)
    }
}

impl OpenOfferRegistry for MockOpenOffers {
    fn close_open_offer(&self, offer_id: &OfferId) -> bool {
        self.open.write().remove(offer_id)
    }
}
