//! # Trade Manager
//!
//! Owns one protocol actor per trade and routes trade messages to it by
//! trade id.
//!
//! - Taking an offer runs the availability handshake first; the taker's
//!   trade only exists once the maker reported the offer available.
//! - The maker's trade is created by the taker's first request
//!   (`InputsForDepositTxRequest` or `CreateSwapTxRequest`) for one of our
//!   available open offers, which is then reserved.
//! - A monitor per trade closes the maker's offer once funds are committed,
//!   releases it if the trade failed before that, and keeps the active
//!   trades gauge.

use async_trait::async_trait;
use parking_lot::RwLock;
use px_02_offer_availability::OfferAvailabilityService;
use px_03_trade_protocol::{
    spawn_protocol, EscrowFlow, ProcessModel, ProtocolFlow, ProtocolServices, TradeAction,
    TradeHandle,
};
use px_04_bsq_swap::{BsqSwapFlow, SwapConfig};
use px_05_dispute::TradeRegistry;
use px_telemetry::{metric_inc, ACTIVE_TRADES, TRADES_STARTED};
use shared_types::ports::PriceFeed;
use shared_types::{
    AvailabilityResult, DisputePayout, DisputeState, ExchangeMessage, NetworkEnvelope, Offer,
    OfferId, ProtocolError, ProtocolKind, Trade, TradeId, TradePhase, TradeRole, TradeState,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::adapters::SnapshotSource;
use crate::error::NodeError;
use crate::managers::OpenOfferManager;

pub struct TradeManager {
    services: ProtocolServices,
    escrow: Arc<dyn ProtocolFlow>,
    swap: Arc<dyn ProtocolFlow>,
    availability: OfferAvailabilityService,
    open_offers: Arc<OpenOfferManager>,
    prices: Arc<dyn PriceFeed>,
    open: RwLock<HashMap<TradeId, TradeHandle>>,
    closed: RwLock<HashMap<TradeId, Trade>>,
    me: Weak<Self>,
}

impl TradeManager {
    pub fn new(
        services: ProtocolServices,
        swap_config: SwapConfig,
        availability: OfferAvailabilityService,
        open_offers: Arc<OpenOfferManager>,
        prices: Arc<dyn PriceFeed>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            services,
            escrow: Arc::new(EscrowFlow),
            swap: Arc::new(BsqSwapFlow::new(swap_config)),
            availability,
            open_offers,
            prices,
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Take `offer` for `amount`: check availability with the maker, then
    /// start the taker's protocol.
    pub async fn take_offer(&self, offer: Offer, amount: u64) -> Result<TradeHandle, NodeError> {
        let trade_id = TradeId::for_offer(&offer.id);
        if self.contains(&trade_id) {
            return Err(NodeError::TradeExists(trade_id));
        }
        if !offer.is_amount_in_range(amount) {
            return Err(NodeError::AmountOutOfRange {
                offer_id: offer.id,
                amount,
            });
        }
        let price = offer
            .price_at(self.prices.market_price(&offer.currency_code))
            .ok_or(NodeError::PriceUnavailable(offer.id))?;

        let outcome = self.availability.check(offer.clone(), price).await?;
        if !outcome.result.is_available() {
            info!(offer_id = %offer.id, result = ?outcome.result, "Offer not available");
            return Err(NodeError::OfferNotAvailable {
                offer_id: offer.id,
                result: outcome.result,
            });
        }

        let role = TradeRole::taker_for(offer.direction);
        let peer = offer.owner.clone();
        let mut trade = Trade::new(offer, role, amount, price, peer);
        trade.mediator = outcome.mediator;
        trade.refund_agent = outcome.refund_agent;

        let handle = self.spawn(trade)?;
        handle.act(TradeAction::TakeOffer).await?;
        Ok(handle)
    }

    /// Resume persisted trades. Completed ones are only kept as snapshots.
    pub fn restore(&self, trades: Vec<Trade>) -> usize {
        let mut resumed = 0;
        for trade in trades {
            if self.contains(&trade.id) {
                continue;
            }
            if trade.is_completed() {
                self.closed.write().insert(trade.id, trade);
            } else if self.spawn(trade).is_ok() {
                resumed += 1;
            }
        }
        resumed
    }

    /// Run a user action on a trade.
    pub async fn act(&self, trade_id: &TradeId, action: TradeAction) -> Result<(), NodeError> {
        let handle = self
            .handle(trade_id)
            .ok_or(NodeError::TradeNotFound(*trade_id))?;
        handle.act(action).await.map_err(NodeError::from)
    }

    /// Route a trade protocol message to its trade.
    pub async fn handle_message(&self, envelope: NetworkEnvelope) -> Result<(), NodeError> {
        let trade_id = envelope
            .message
            .trade_id()
            .ok_or(NodeError::UnroutableMessage(envelope.name()))?;

        if let Some(handle) = self.handle(&trade_id) {
            return handle.deliver(envelope).await.map_err(NodeError::from);
        }

        let protocol = match &envelope.message {
            ExchangeMessage::InputsForDepositTxRequest(_) => ProtocolKind::Escrow,
            ExchangeMessage::CreateSwapTxRequest(_) => ProtocolKind::BsqSwap,
            _ => {
                warn!(trade_id = %trade_id, message = envelope.name(), uid = %envelope.uid, "Message for unknown trade");
                self.nack(&envelope, format!("Trade {trade_id} not found"));
                return Err(NodeError::TradeNotFound(trade_id));
            }
        };

        let handle = match self.start_maker_trade(&envelope, trade_id, protocol) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(trade_id = %trade_id, message = envelope.name(), error = %e, "Take request refused");
                self.nack(&envelope, e.to_string());
                return Err(e);
            }
        };
        handle.deliver(envelope).await.map_err(NodeError::from)
    }

    fn start_maker_trade(
        &self,
        envelope: &NetworkEnvelope,
        trade_id: TradeId,
        protocol: ProtocolKind,
    ) -> Result<TradeHandle, NodeError> {
        let offer_id = OfferId(trade_id.0);
        let not_available = |result| NodeError::OfferNotAvailable { offer_id, result };

        let open_offer = self
            .open_offers
            .get(&offer_id)
            .filter(|o| o.offer.protocol == protocol)
            .ok_or_else(|| not_available(AvailabilityResult::UnknownFailure))?;
        let (amount, price) = match &envelope.message {
            ExchangeMessage::InputsForDepositTxRequest(r) => (r.trade_amount, r.trade_price),
            ExchangeMessage::CreateSwapTxRequest(r) => (r.trade_amount, r.trade_price),
            other => return Err(NodeError::UnroutableMessage(other.name())),
        };
        if !self.open_offers.reserve(&offer_id) {
            return Err(not_available(AvailabilityResult::OfferTaken));
        }

        let role = TradeRole::maker_for(open_offer.offer.direction);
        let trade = Trade::new(open_offer.offer, role, amount, price, envelope.sender.clone());
        self.spawn(trade)
    }

    fn spawn(&self, trade: Trade) -> Result<TradeHandle, NodeError> {
        let trade_id = trade.id;
        let protocol = trade.protocol();
        let flow = match protocol {
            ProtocolKind::Escrow => self.escrow.clone(),
            ProtocolKind::BsqSwap => self.swap.clone(),
        };

        let mut open = self.open.write();
        if open.contains_key(&trade_id) {
            return Err(NodeError::TradeExists(trade_id));
        }
        info!(trade_id = %trade_id, protocol = ?protocol, role = ?trade.role, peer = %trade.peer, "Starting trade");
        let handle = spawn_protocol(ProcessModel::new(trade, self.services.clone()), flow);
        open.insert(trade_id, handle.clone());
        drop(open);

        let label = format!("{protocol:?}");
        metric_inc!(TRADES_STARTED, &[label.as_str()]);
        ACTIVE_TRADES.inc();
        self.spawn_monitor(&handle);
        self.services.persistence.request_persistence();
        Ok(handle)
    }

    fn spawn_monitor(&self, handle: &TradeHandle) {
        let me = self.me.clone();
        let mut snapshot = handle.subscribe();
        tokio::spawn(async move {
            let mut offer_settled = false;
            loop {
                let trade = snapshot.borrow_and_update().clone();
                let Some(manager) = me.upgrade() else {
                    break;
                };
                if !offer_settled {
                    offer_settled = manager.settle_offer(&trade);
                }
                drop(manager);
                if trade.is_completed() || snapshot.changed().await.is_err() {
                    break;
                }
            }
            ACTIVE_TRADES.dec();
        });
    }

    /// Close or release the maker's offer. Returns whether it is settled.
    fn settle_offer(&self, trade: &Trade) -> bool {
        if !trade.role.is_maker() {
            return true;
        }
        let offer_id = trade.offer.id;
        if funds_committed(trade) {
            self.open_offers.close(&offer_id);
            debug!(trade_id = %trade.id, "Offer closed, funds committed");
            return true;
        }
        if trade.error_message.is_some() {
            self.open_offers.release(&offer_id);
            info!(trade_id = %trade.id, "Trade failed early, offer available again");
            return true;
        }
        false
    }

    fn nack(&self, envelope: &NetworkEnvelope, error: String) {
        let bus = self.services.bus.clone();
        let nack = envelope.ack(bus.my_address(), false, Some(error));
        let peer = envelope.sender.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.send(&peer, nack).await {
                debug!(peer = %peer, error = %e, "Nack not delivered");
            }
        });
    }

    pub fn contains(&self, trade_id: &TradeId) -> bool {
        self.open.read().contains_key(trade_id) || self.closed.read().contains_key(trade_id)
    }

    pub fn handle(&self, trade_id: &TradeId) -> Option<TradeHandle> {
        self.open.read().get(trade_id).cloned()
    }

    /// Snapshot of an open or closed trade.
    pub fn trade(&self, trade_id: &TradeId) -> Option<Trade> {
        self.handle(trade_id)
            .map(|h| h.trade())
            .or_else(|| self.closed.read().get(trade_id).cloned())
    }

    pub fn open_trades(&self) -> Vec<Trade> {
        self.open.read().values().map(TradeHandle::trade).collect()
    }

    pub fn closed_trades(&self) -> Vec<Trade> {
        self.closed.read().values().cloned().collect()
    }

    /// Stop every trade actor.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.open.read().values().cloned().collect();
        info!(trades = handles.len(), "Stopping trade protocols");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

fn funds_committed(trade: &Trade) -> bool {
    match trade.protocol() {
        ProtocolKind::Escrow => trade.phase() >= TradePhase::DepositPublished,
        ProtocolKind::BsqSwap => matches!(
            trade.state,
            TradeState::SwapMakerSignedTx | TradeState::SwapTxPublished | TradeState::SwapCompleted
        ),
    }
}

impl SnapshotSource for TradeManager {
    fn snapshot(&self) -> Vec<Trade> {
        let mut trades = self.open_trades();
        trades.extend(self.closed_trades());
        trades
    }
}

#[async_trait]
impl TradeRegistry for TradeManager {
    async fn trade(&self, trade_id: &TradeId) -> Option<Trade> {
        TradeManager::trade(self, trade_id)
    }

    async fn set_dispute_state(
        &self,
        trade_id: &TradeId,
        state: DisputeState,
    ) -> Result<(), ProtocolError> {
        self.handle(trade_id)
            .ok_or_else(|| ProtocolError::ContextNotAvailable(format!("trade {trade_id}")))?
            .set_dispute_state(state)
            .await
    }

    async fn apply_dispute_payout(
        &self,
        trade_id: &TradeId,
        payout: DisputePayout,
    ) -> Result<bool, ProtocolError> {
        self.handle(trade_id)
            .ok_or_else(|| ProtocolError::ContextNotAvailable(format!("trade {trade_id}")))?
            .apply_dispute_payout(payout)
            .await
    }

    async fn close_disputed_trade(&self, trade_id: &TradeId) {
        let Some(handle) = self.open.write().remove(trade_id) else {
            return;
        };
        let mut snapshot = handle.subscribe();
        handle.shutdown().await;
        // Ends when the actor dropped its last snapshot.
        while snapshot.changed().await.is_ok() {}
        let trade = snapshot.borrow().clone();

        info!(trade_id = %trade_id, dispute = ?trade.dispute_state, "Disputed trade closed");
        self.closed.write().insert(*trade_id, trade);
        self.services.persistence.request_persistence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::testing::Managers;
    use px_02_offer_availability::OpenOfferState;
    use shared_crypto::KeyRing;
    use shared_types::fixtures::offer;
    use shared_types::ports::MockMessageBus;
    use shared_types::{InputsForDepositTxRequest, NodeAddress, OfferDirection, SupportType, COIN};

    fn fixture() -> Managers {
        Managers::new("maker.onion")
    }

    fn deposit_request(offer: &Offer, sender: &str) -> NetworkEnvelope {
        NetworkEnvelope::new(
            NodeAddress::new(sender, 9999),
            ExchangeMessage::InputsForDepositTxRequest(InputsForDepositTxRequest {
                trade_id: TradeId::for_offer(&offer.id),
                trade_amount: COIN / 2,
                trade_price: 2_000_000,
                taker_fee_tx_id: "taker-fee".to_string(),
                taker_account_id: "taker-account".to_string(),
                taker_payment_method_id: "SEPA".to_string(),
                taker_signing_pub_key: KeyRing::from_seed([2; 32]).pub_key_hex(),
                taker_payout_address: "taker-payout".to_string(),
                taker_change_address: "taker-change".to_string(),
                taker_inputs: Vec::new(),
                mediator: None,
                refund_agent: None,
            }),
        )
    }

    fn nacks(bus: &MockMessageBus) -> Vec<String> {
        bus.sent_envelopes()
            .into_iter()
            .filter_map(|e| match e.message {
                ExchangeMessage::Ack(ack) if !ack.success => ack.error_message,
                _ => None,
            })
            .collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_first_request_creates_maker_trade() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.open_offers.place_offer(offer.clone()).unwrap();

        fx.trades
            .handle_message(deposit_request(&offer, "taker"))
            .await
            .unwrap();

        let trade_id = TradeId::for_offer(&offer.id);
        let trade = fx.trades.trade(&trade_id).unwrap();
        assert_eq!(trade.role, TradeRole::SellerAsMaker);
        assert_eq!(trade.peer, NodeAddress::new("taker", 9999));
        assert_eq!(trade.amount, COIN / 2);
        assert_eq!(fx.open_offers.get(&offer.id).unwrap().state, OpenOfferState::Reserved);
        assert!(fx.persistence.count() >= 1);
    }

    #[tokio::test]
    async fn test_early_failure_releases_offer() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.open_offers.place_offer(offer.clone()).unwrap();

        // The taker fee tx is not on the ledger.
        fx.trades
            .handle_message(deposit_request(&offer, "taker"))
            .await
            .unwrap();
        let handle = fx.trades.handle(&TradeId::for_offer(&offer.id)).unwrap();
        handle.wait_for(|t| t.error_message.is_some()).await;
        settle().await;

        assert_eq!(fx.open_offers.get(&offer.id).unwrap().state, OpenOfferState::Available);
    }

    #[tokio::test]
    async fn test_request_for_unknown_offer_nacked() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);

        let err = fx
            .trades
            .handle_message(deposit_request(&offer, "taker"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::OfferNotAvailable { .. }));
        assert!(fx.trades.trade(&TradeId::for_offer(&offer.id)).is_none());

        settle().await;
        assert_eq!(nacks(&fx.bus).len(), 1);
    }

    #[tokio::test]
    async fn test_request_for_reserved_offer_refused() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.open_offers.place_offer(offer.clone()).unwrap();
        fx.open_offers.reserve(&offer.id);

        let err = fx
            .trades
            .handle_message(deposit_request(&offer, "taker"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::OfferNotAvailable {
                result: AvailabilityResult::OfferTaken,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_swap_request_does_not_match_escrow_offer() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.open_offers.place_offer(offer.clone()).unwrap();

        let envelope = NetworkEnvelope::new(
            NodeAddress::new("taker", 9999),
            ExchangeMessage::CreateSwapTxRequest(shared_types::CreateSwapTxRequest {
                trade_id: TradeId::for_offer(&offer.id),
                trade_amount: COIN / 2,
                trade_price: 2_000_000,
                bsq_trade_amount: 1_000_000,
                taker_inputs: Vec::new(),
                taker_outputs: Vec::new(),
                taker_receive_address: "taker-receive".to_string(),
                tx_fee_per_party: 2_000,
            }),
        );
        assert!(fx.trades.handle_message(envelope).await.is_err());
        assert_eq!(fx.open_offers.get(&offer.id).unwrap().state, OpenOfferState::Available);
    }

    #[tokio::test]
    async fn test_take_offer_rejects_amount_out_of_range() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let err = fx.trades.take_offer(offer.clone(), offer.amount + 1).await.unwrap_err();
        assert!(matches!(err, NodeError::AmountOutOfRange { .. }));
        assert!(fx.bus.sent_envelopes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_offer_requires_available_verdict() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);

        // Nobody answers: the handshake times out.
        let err = fx.trades.take_offer(offer.clone(), COIN / 2).await.unwrap_err();
        assert!(matches!(err, NodeError::Availability(_)));
        assert!(fx.trades.trade(&TradeId::for_offer(&offer.id)).is_none());
    }

    #[tokio::test]
    async fn test_dispute_updates_reach_the_actor() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.open_offers.place_offer(offer.clone()).unwrap();
        let _ = fx.trades.handle_message(deposit_request(&offer, "taker")).await;
        let trade_id = TradeId::for_offer(&offer.id);

        TradeRegistry::set_dispute_state(
            fx.trades.as_ref(),
            &trade_id,
            DisputeState::StartedByPeer(SupportType::Refund),
        )
        .await
        .unwrap();
        let payout = DisputePayout {
            buyer_payout_amount: COIN / 2,
            seller_payout_amount: COIN / 10,
            payout_tx_id: Some("refund-payout".to_string()),
        };
        assert!(fx.trades.apply_dispute_payout(&trade_id, payout.clone()).await.unwrap());
        assert!(!fx.trades.apply_dispute_payout(&trade_id, payout).await.unwrap());

        fx.trades.close_disputed_trade(&trade_id).await;
        fx.trades.close_disputed_trade(&trade_id).await;

        assert!(fx.trades.handle(&trade_id).is_none());
        let closed = fx.trades.closed_trades();
        assert_eq!(closed.len(), 1);
        assert_eq!(
            closed[0].dispute_state,
            DisputeState::StartedByPeer(SupportType::Refund)
        );
        assert_eq!(closed[0].payout_tx_id.as_deref(), Some("refund-payout"));
        assert_eq!(
            TradeRegistry::set_dispute_state(
                fx.trades.as_ref(),
                &trade_id,
                DisputeState::Closed(SupportType::Refund)
            )
            .await,
            Err(ProtocolError::ContextNotAvailable(format!("trade {trade_id}")))
        );
    }

    #[tokio::test]
    async fn test_restore_resumes_open_trades() {
        let fx = fixture();
        let peer = NodeAddress::new("taker", 9999);
        let open = Trade::new(
            offer(OfferDirection::Buy, ProtocolKind::Escrow),
            TradeRole::BuyerAsMaker,
            COIN,
            2_000_000,
            peer.clone(),
        );
        let mut done = Trade::new(
            offer(OfferDirection::Sell, ProtocolKind::BsqSwap),
            TradeRole::SellerAsMaker,
            COIN,
            2_000_000,
            peer,
        );
        done.state = TradeState::SwapCompleted;

        assert_eq!(fx.trades.restore(vec![open.clone(), done.clone()]), 1);
        assert!(fx.trades.handle(&open.id).is_some());
        assert!(fx.trades.handle(&done.id).is_none());
        assert_eq!(fx.trades.trade(&done.id).unwrap().state, TradeState::SwapCompleted);

        // Already known.
        assert_eq!(fx.trades.restore(vec![open]), 0);
        assert_eq!(fx.trades.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_message_for_unknown_trade_nacked() {
        let fx = fixture();
        let envelope = NetworkEnvelope::new(
            NodeAddress::new("taker", 9999),
            ExchangeMessage::DepositTxPublished(shared_types::DepositTxPublished {
                trade_id: TradeId::for_offer(&OfferId::new()),
                deposit_tx_id: Some("deposit".to_string()),
                taker_contract_signature: "signature".to_string(),
            }),
        );
        let err = fx.trades.handle_message(envelope).await.unwrap_err();
        assert!(matches!(err, NodeError::TradeNotFound(_)));
        settle().await;
        assert_eq!(nacks(&fx.bus).len(), 1);
    }
}
