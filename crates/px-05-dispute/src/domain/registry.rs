//! Concurrent dispute list.
//!
//! Appends come from any trade; readers iterate over snapshots, so a reader
//! never observes a half-applied append.

use super::dispute::Dispute;
use parking_lot::RwLock;
use shared_types::{DisputeInfo, SupportType, TradeId};

/// More disputes than this for one trade is treated as a replay.
pub const MAX_DISPUTES_PER_TRADE: usize = 2;

/// Every dispute known to this node.
#[derive(Debug, Default)]
pub struct DisputeRegistry {
    disputes: RwLock<Vec<Dispute>>,
}

impl DisputeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `dispute`. Returns `false` if one with the same trade and
    /// support type exists.
    pub fn add(&self, dispute: Dispute) -> bool {
        let mut disputes = self.disputes.write();
        if disputes
            .iter()
            .any(|d| d.trade_id() == dispute.trade_id() && d.support_type() == dispute.support_type())
        {
            return false;
        }
        disputes.push(dispute);
        true
    }

    pub fn find(&self, trade_id: &TradeId, support_type: SupportType) -> Option<Dispute> {
        self.disputes
            .read()
            .iter()
            .find(|d| d.trade_id() == *trade_id && d.support_type() == support_type)
            .cloned()
    }

    /// Mutate the matching dispute in place.
    pub fn update<R>(
        &self,
        trade_id: &TradeId,
        support_type: SupportType,
        f: impl FnOnce(&mut Dispute) -> R,
    ) -> Option<R> {
        self.disputes
            .write()
            .iter_mut()
            .find(|d| d.trade_id() == *trade_id && d.support_type() == support_type)
            .map(f)
    }

    pub fn snapshot(&self) -> Vec<Dispute> {
        self.disputes.read().clone()
    }

    pub fn count_for_trade(&self, trade_id: &TradeId) -> usize {
        self.disputes
            .read()
            .iter()
            .filter(|d| d.trade_id() == *trade_id)
            .count()
    }

    /// Reject `info` if its trade already has too many disputes or its
    /// transaction ids belong to a dispute of another trade.
    pub fn check_replay(&self, info: &DisputeInfo) -> Result<(), String> {
        let disputes = self.snapshot();
        let same_trade = disputes
            .iter()
            .filter(|d| d.trade_id() == info.trade_id)
            .count();
        if same_trade >= MAX_DISPUTES_PER_TRADE {
            return Err(format!("trade already has {same_trade} disputes"));
        }

        for other in disputes.iter().filter(|d| d.trade_id() != info.trade_id) {
            if collides(&info.deposit_tx_id, &other.info.deposit_tx_id) {
                return Err(format!(
                    "deposit tx id is used by the dispute of trade {}",
                    other.trade_id()
                ));
            }
            if collides(&info.delayed_payout_tx_id, &other.info.delayed_payout_tx_id) {
                return Err(format!(
                    "delayed payout tx id is used by the dispute of trade {}",
                    other.trade_id()
                ));
            }
        }
        Ok(())
    }
}

fn collides(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}
