//! # Dispute Manager
//!
//! Opens disputes, stores the ones our peer opened and applies the agent's
//! result.
//!
//! ## Result before dispute
//!
//! The agent's result may overtake the `PeerOpenedDispute` it belongs to.
//! An unmatched result is looked up again after `result_retry_delay`, at
//! most `max_result_retries` times, then dropped. Retry timers are keyed by
//! the message uid and owned by the manager; a match, a drop or `shutdown`
//! releases them.
//!
//! ## Closing
//!
//! Always in this order, each step safe to repeat:
//!
//! 1. record chat line and result on the dispute
//! 2. dispute state of the trade to `Closed`
//! 3. payout recorded on the trade, trade moved to closed storage
//! 4. still-open offer released
//! 5. ack, then persistence requested

use crate::config::DisputeConfig;
use crate::domain::{Dispute, DisputeRegistry};
use crate::error::DisputeError;
use crate::ports::{OpenOfferRegistry, TradeRegistry};
use parking_lot::Mutex;
use px_01_task_runner::Timer;
use shared_bus::{EventPublisher, ExchangeEvent};
use shared_types::ports::{MessageBus, PersistenceRequester};
use shared_types::{
    now_secs, DisputeInfo, DisputeOpened, DisputeResult, DisputeState, ExchangeMessage,
    MessageUid, NetworkEnvelope, OfferId, ProtocolError, SupportType, TradeId,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// What became of a dispute result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The result was applied to the dispute and the trade.
    Applied,
    /// The same result was applied before. Only acknowledged again.
    AlreadyApplied,
    /// No matching dispute yet. Looked up again after a delay.
    Deferred { attempt: u32 },
    /// Still no matching dispute after the last retry.
    Dropped,
}

struct PendingResult {
    attempts: u32,
    _timer: Timer,
}

/// Dispute escalation of all trades of this node.
pub struct DisputeManager {
    config: DisputeConfig,
    bus: Arc<dyn MessageBus>,
    trades: Arc<dyn TradeRegistry>,
    open_offers: Arc<dyn OpenOfferRegistry>,
    persistence: Arc<dyn PersistenceRequester>,
    events: Arc<dyn EventPublisher>,
    registry: DisputeRegistry,
    pending: Mutex<HashMap<MessageUid, PendingResult>>,
    me: Weak<Self>,
}

impl DisputeManager {
    pub fn new(
        config: DisputeConfig,
        bus: Arc<dyn MessageBus>,
        trades: Arc<dyn TradeRegistry>,
        open_offers: Arc<dyn OpenOfferRegistry>,
        persistence: Arc<dyn PersistenceRequester>,
        events: Arc<dyn EventPublisher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            bus,
            trades,
            open_offers,
            persistence,
            events,
            registry: DisputeRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Every dispute this node knows about.
    pub fn registry(&self) -> &DisputeRegistry {
        &self.registry
    }

    /// Result messages waiting for a delayed lookup.
    pub fn pending_results(&self) -> usize {
        self.pending.lock().len()
    }

    /// Open a dispute with the agent of `support_type`.
    pub async fn open_dispute(
        &self,
        trade_id: TradeId,
        support_type: SupportType,
    ) -> Result<(), DisputeError> {
        let trade = self
            .trades
            .trade(&trade_id)
            .await
            .ok_or(DisputeError::TradeNotFound { trade_id })?;
        let agent = match support_type {
            SupportType::Mediation => trade.mediator.clone(),
            SupportType::Refund | SupportType::Arbitration => trade.refund_agent.clone(),
        }
        .ok_or(DisputeError::NoAgent {
            trade_id,
            support_type,
        })?;

        let requested = DisputeState::Requested(support_type);
        if !trade.dispute_state.can_transition_to(&requested) {
            return Err(ProtocolError::InvalidDisputeTransition {
                from: trade.dispute_state,
                to: requested,
            }
            .into());
        }
        if self.registry.find(&trade_id, support_type).is_some() {
            return Err(DisputeError::AlreadyStored {
                trade_id,
                support_type,
            });
        }

        let dispute = DisputeInfo {
            trade_id,
            support_type,
            opener: self.bus.my_address(),
            deposit_tx_id: trade.deposit_tx_id.clone(),
            delayed_payout_tx_id: None,
            contract_hash: trade.contract_hash.clone(),
            opened_at: now_secs(),
        };
        self.registry
            .check_replay(&dispute)
            .map_err(|reason| DisputeError::ReplayDetected { trade_id, reason })?;

        let envelope = NetworkEnvelope::new(
            self.bus.my_address(),
            ExchangeMessage::DisputeOpened(DisputeOpened {
                dispute: dispute.clone(),
            }),
        );
        let uid = envelope.uid;
        let outcome = self.bus.send(&agent, envelope).await.map_err(|e| {
            warn!(trade_id = %trade_id, uid = %uid, agent = %agent, error = %e, "Sending dispute message failed");
            DisputeError::from(e)
        })?;
        info!(
            trade_id = %trade_id,
            uid = %uid,
            agent = %agent,
            support_type = ?support_type,
            outcome = ?outcome,
            "Dispute opened"
        );

        self.trades.set_dispute_state(&trade_id, requested).await?;
        self.registry.add(Dispute::new(dispute, true));
        self.persistence.request_persistence();
        Ok(())
    }

    /// Dispatch an inbound dispute message.
    pub async fn handle(&self, envelope: NetworkEnvelope) -> Result<(), DisputeError> {
        match envelope.message {
            ExchangeMessage::PeerOpenedDispute(_) => self.on_peer_opened_dispute(envelope).await,
            ExchangeMessage::DisputeChat(_) => self.on_chat(envelope).await,
            ExchangeMessage::DisputeResult(_) => self.on_dispute_result(envelope).await.map(|_| ()),
            _ => Err(DisputeError::UnexpectedMessage(envelope.name())),
        }
    }

    /// The agent tells us our peer opened a dispute.
    pub async fn on_peer_opened_dispute(&self, envelope: NetworkEnvelope) -> Result<(), DisputeError> {
        let ExchangeMessage::PeerOpenedDispute(message) = &envelope.message else {
            return Err(DisputeError::UnexpectedMessage(envelope.name()));
        };
        let dispute = message.dispute.clone();
        let trade_id = dispute.trade_id;

        let result = self.store_peer_dispute(dispute).await;
        match &result {
            Ok(()) => self.send_ack(&envelope, true, None),
            Err(e) => {
                warn!(trade_id = %trade_id, uid = %envelope.uid, error = %e, "Peer opened dispute rejected");
                self.send_ack(&envelope, false, Some(e.to_string()));
            }
        }
        self.persistence.request_persistence();
        result
    }

    async fn store_peer_dispute(&self, dispute: DisputeInfo) -> Result<(), DisputeError> {
        let trade_id = dispute.trade_id;
        let support_type = dispute.support_type;
        if self.trades.trade(&trade_id).await.is_none() {
            return Err(DisputeError::TradeNotFound { trade_id });
        }
        if self.registry.find(&trade_id, support_type).is_some() {
            return Err(DisputeError::AlreadyStored {
                trade_id,
                support_type,
            });
        }
        self.registry
            .check_replay(&dispute)
            .map_err(|reason| DisputeError::ReplayDetected { trade_id, reason })?;

        // The trade must be open before the dispute becomes visible to results.
        self.trades
            .set_dispute_state(&trade_id, DisputeState::StartedByPeer(support_type))
            .await?;
        self.registry.add(Dispute::new(dispute, false));
        info!(trade_id = %trade_id, support_type = ?support_type, "Peer opened dispute");
        Ok(())
    }

    /// A chat line from the agent.
    pub async fn on_chat(&self, envelope: NetworkEnvelope) -> Result<(), DisputeError> {
        let ExchangeMessage::DisputeChat(message) = &envelope.message else {
            return Err(DisputeError::UnexpectedMessage(envelope.name()));
        };
        let trade_id = message.chat.trade_id;
        let support_type = message.support_type;
        let chat = message.chat.clone();

        match self
            .registry
            .update(&trade_id, support_type, |dispute| dispute.add_chat(chat))
        {
            Some(true) => {
                self.send_ack(&envelope, true, None);
                self.persistence.request_persistence();
                Ok(())
            }
            Some(false) => {
                debug!(trade_id = %trade_id, uid = %envelope.uid, "Chat message already stored");
                self.send_ack(&envelope, true, None);
                Ok(())
            }
            None => {
                let e = DisputeError::DisputeNotFound {
                    trade_id,
                    support_type,
                };
                warn!(trade_id = %trade_id, uid = %envelope.uid, error = %e, "Chat message dropped");
                self.send_ack(&envelope, false, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// The agent's result.
    pub async fn on_dispute_result(
        &self,
        envelope: NetworkEnvelope,
    ) -> Result<ResultOutcome, DisputeError> {
        let result = match &envelope.message {
            ExchangeMessage::DisputeResult(message) => message.result.clone(),
            _ => return Err(DisputeError::UnexpectedMessage(envelope.name())),
        };

        if self
            .registry
            .find(&result.trade_id, result.support_type)
            .is_none()
        {
            return Ok(self.defer_result(envelope, result.trade_id).await);
        }

        self.pending.lock().remove(&envelope.uid);
        match self.close_dispute(&result).await {
            Ok(outcome) => {
                self.send_ack(&envelope, true, None);
                self.persistence.request_persistence();
                Ok(outcome)
            }
            Err(e) => {
                warn!(trade_id = %result.trade_id, uid = %envelope.uid, error = %e, "Applying dispute result failed");
                self.send_ack(&envelope, false, Some(e.to_string()));
                self.persistence.request_persistence();
                Err(e)
            }
        }
    }

    async fn close_dispute(&self, result: &DisputeResult) -> Result<ResultOutcome, DisputeError> {
        let trade_id = result.trade_id;
        let support_type = result.support_type;

        let first_result = self
            .registry
            .update(&trade_id, support_type, |dispute| {
                if !dispute.add_chat(result.chat_message.clone()) {
                    warn!(trade_id = %trade_id, "We got a dispute result chat message that we have already stored");
                }
                let first = dispute.set_result(result.clone());
                dispute.close();
                first
            })
            .unwrap_or(false);
        if !first_result {
            warn!(
                trade_id = %trade_id,
                support_type = ?support_type,
                "We got already a result for this dispute. Keeping the first one"
            );
        }

        let closed = DisputeState::Closed(support_type);
        let trade = self.trades.trade(&trade_id).await;
        if let Some(trade) = &trade {
            if trade.dispute_state.is_open() && trade.dispute_state.support_type() == Some(support_type) {
                self.trades.set_dispute_state(&trade_id, closed).await?;
            }
        }

        // A mediation result is a proposal; the trade continues or escalates.
        let applied = if support_type == SupportType::Mediation {
            first_result
        } else {
            let applied = match &trade {
                Some(_) => {
                    let applied = self
                        .trades
                        .apply_dispute_payout(&trade_id, result.payout.clone())
                        .await?;
                    self.trades.close_disputed_trade(&trade_id).await;
                    applied
                }
                None => false,
            };
            if self.open_offers.close_open_offer(&OfferId(trade_id.0)) {
                info!(trade_id = %trade_id, "Closed open offer of disputed trade");
            }
            applied
        };

        if !applied {
            warn!(trade_id = %trade_id, "Dispute result already applied, acknowledging again");
            return Ok(ResultOutcome::AlreadyApplied);
        }
        info!(
            trade_id = %trade_id,
            support_type = ?support_type,
            buyer_payout_amount = result.payout.buyer_payout_amount,
            seller_payout_amount = result.payout.seller_payout_amount,
            "Dispute result applied"
        );
        self.events
            .publish(ExchangeEvent::DisputeResultApplied {
                trade_id,
                buyer_payout_amount: result.payout.buyer_payout_amount,
                seller_payout_amount: result.payout.seller_payout_amount,
            })
            .await;
        Ok(ResultOutcome::Applied)
    }

    async fn defer_result(&self, envelope: NetworkEnvelope, trade_id: TradeId) -> ResultOutcome {
        let uid = envelope.uid;
        let attempt = {
            let mut pending = self.pending.lock();
            let attempts = pending.get(&uid).map_or(0, |p| p.attempts);
            if attempts >= self.config.max_result_retries {
                pending.remove(&uid);
                None
            } else {
                let timer = self.schedule_retry(envelope);
                pending.insert(
                    uid,
                    PendingResult {
                        attempts: attempts + 1,
                        _timer: timer,
                    },
                );
                Some(attempts + 1)
            }
        };

        match attempt {
            Some(attempt) => {
                warn!(
                    trade_id = %trade_id,
                    uid = %uid,
                    attempt,
                    delay_ms = self.config.result_retry_delay.as_millis() as u64,
                    "No dispute found for dispute result. We try again after a short delay"
                );
                self.events
                    .publish(ExchangeEvent::DisputeResultDeferred { trade_id, attempt })
                    .await;
                ResultOutcome::Deferred { attempt }
            }
            None => {
                warn!(
                    trade_id = %trade_id,
                    uid = %uid,
                    "No dispute found for dispute result after retrying. The message is probably erroneous and is dropped"
                );
                self.events
                    .publish(ExchangeEvent::DisputeResultDropped { trade_id })
                    .await;
                ResultOutcome::Dropped
            }
        }
    }

    fn schedule_retry(&self, envelope: NetworkEnvelope) -> Timer {
        let me = self.me.clone();
        Timer::run_after(self.config.result_retry_delay, async move {
            let Some(manager) = me.upgrade() else {
                return;
            };
            if let Err(e) = manager.on_dispute_result(envelope).await {
                warn!(error = %e, "Delayed dispute result lookup failed");
            }
        })
    }

    /// Cancel every pending result retry.
    pub fn shutdown(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            info!(count = pending.len(), "Cancelled pending dispute result retries");
        }
    }

    fn send_ack(&self, envelope: &NetworkEnvelope, success: bool, error_message: Option<String>) {
        let bus = self.bus.clone();
        let ack = envelope.ack(bus.my_address(), success, error_message);
        let peer = envelope.sender.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.send(&peer, ack).await {
                debug!(peer = %peer, error = %e, "Ack for dispute message not delivered");
            }
        });
    }
}
