//! # Open Offer Manager
//!
//! The maker's published offers and their lifecycle:
//!
//! ```text
//! place ──→ Available ──take──→ Reserved ──funds locked──→ Closed
//!              ↑  │                 │
//!              │  └─deactivate──→ Deactivated
//!              └──────release───────┘ (trade failed early)
//! ```
//!
//! Also answers availability requests for these offers.

use parking_lot::RwLock;
use px_02_offer_availability::ports::{DisputeAgentSelector, OpenOfferBook, PeerFilter};
use px_02_offer_availability::{AvailabilityResponder, OpenOffer, OpenOfferState};
use px_05_dispute::OpenOfferRegistry;
use shared_types::ports::{MessageBus, PriceFeed};
use shared_types::{AvailabilityResult, NetworkEnvelope, Offer, OfferAvailabilityRequest, OfferId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::NodeError;

#[derive(Default)]
struct OfferBook {
    offers: RwLock<HashMap<OfferId, OpenOffer>>,
}

impl OpenOfferBook for OfferBook {
    fn open_offer(&self, offer_id: &OfferId) -> Option<OpenOffer> {
        self.offers.read().get(offer_id).cloned()
    }
}

impl OfferBook {
    /// Move the offer from one of `from` to `to`.
    fn transition(&self, offer_id: &OfferId, from: &[OpenOfferState], to: OpenOfferState) -> bool {
        let mut offers = self.offers.write();
        match offers.get_mut(offer_id) {
            Some(open_offer) if from.contains(&open_offer.state) => {
                debug!(offer_id = %offer_id, from = ?open_offer.state, to = ?to, "Open offer state changed");
                open_offer.state = to;
                true
            }
            _ => false,
        }
    }
}

pub struct OpenOfferManager {
    book: Arc<OfferBook>,
    responder: AvailabilityResponder,
}

impl OpenOfferManager {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        agents: Arc<dyn DisputeAgentSelector>,
        peers: Arc<dyn PeerFilter>,
        prices: Arc<dyn PriceFeed>,
    ) -> Self {
        let book = Arc::new(OfferBook::default());
        let responder = AvailabilityResponder::new(bus, book.clone(), agents, peers, prices);
        Self { book, responder }
    }

    /// Publish `offer`.
    pub fn place_offer(&self, offer: Offer) -> Result<(), NodeError> {
        offer.validate().map_err(NodeError::InvalidOffer)?;
        info!(offer_id = %offer.id, protocol = ?offer.protocol, amount = offer.amount, "Offer placed");
        self.book.offers.write().insert(offer.id, OpenOffer::new(offer));
        Ok(())
    }

    pub fn get(&self, offer_id: &OfferId) -> Option<OpenOffer> {
        self.book.open_offer(offer_id)
    }

    pub fn open_offers(&self) -> Vec<OpenOffer> {
        self.book.offers.read().values().cloned().collect()
    }

    /// Reserve an available offer for a starting trade.
    pub fn reserve(&self, offer_id: &OfferId) -> bool {
        self.book
            .transition(offer_id, &[OpenOfferState::Available], OpenOfferState::Reserved)
    }

    /// Make a reserved offer takeable again.
    pub fn release(&self, offer_id: &OfferId) -> bool {
        self.book
            .transition(offer_id, &[OpenOfferState::Reserved], OpenOfferState::Available)
    }

    pub fn deactivate(&self, offer_id: &OfferId) -> bool {
        self.book
            .transition(offer_id, &[OpenOfferState::Available], OpenOfferState::Deactivated)
    }

    pub fn activate(&self, offer_id: &OfferId) -> bool {
        self.book
            .transition(offer_id, &[OpenOfferState::Deactivated], OpenOfferState::Available)
    }

    /// Close the offer unless it is closed already.
    pub fn close(&self, offer_id: &OfferId) -> bool {
        self.book.transition(
            offer_id,
            &[
                OpenOfferState::Available,
                OpenOfferState::Reserved,
                OpenOfferState::Deactivated,
            ],
            OpenOfferState::Closed,
        )
    }

    /// Judge a taker's availability request and answer it.
    pub async fn handle_availability_request(
        &self,
        envelope: &NetworkEnvelope,
        request: &OfferAvailabilityRequest,
    ) -> AvailabilityResult {
        self.responder.handle_request(envelope, request).await
    }
}

impl OpenOfferRegistry for OpenOfferManager {
    fn close_open_offer(&self, offer_id: &OfferId) -> bool {
        self.close(offer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use px_02_offer_availability::ports::{IgnoreList, StaticAgents};
    use shared_types::fixtures::offer;
    use shared_types::ports::{MockMessageBus, StaticPriceFeed};
    use shared_types::{ExchangeMessage, NodeAddress, OfferDirection, ProtocolKind};

    struct Fixture {
        bus: Arc<MockMessageBus>,
        peers: Arc<IgnoreList>,
        manager: OpenOfferManager,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(MockMessageBus::new(NodeAddress::new("maker.onion", 9999)));
        let peers = Arc::new(IgnoreList::default());
        let agents = StaticAgents {
            mediator: Some(NodeAddress::new("mediator", 1)),
            refund_agent: Some(NodeAddress::new("refund-agent", 1)),
        };
        let manager = OpenOfferManager::new(
            bus.clone(),
            Arc::new(agents),
            peers.clone(),
            Arc::new(StaticPriceFeed::default()),
        );
        Fixture {
            bus,
            peers,
            manager,
        }
    }

    fn request_for(offer: &Offer) -> NetworkEnvelope {
        NetworkEnvelope::new(
            NodeAddress::new("taker", 9999),
            ExchangeMessage::OfferAvailabilityRequest(OfferAvailabilityRequest {
                offer_id: offer.id,
                takers_trade_price: 2_000_000,
                taker_pub_key: "taker-key".to_string(),
                supported_capabilities: px_02_offer_availability::default_capabilities(),
            }),
        )
    }

    async fn ask(fx: &Fixture, offer: &Offer) -> AvailabilityResult {
        let envelope = request_for(offer);
        let ExchangeMessage::OfferAvailabilityRequest(request) = &envelope.message else {
            unreachable!();
        };
        fx.manager.handle_availability_request(&envelope, request).await
    }

    #[test]
    fn test_lifecycle() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.manager.place_offer(offer.clone()).unwrap();

        assert!(fx.manager.reserve(&offer.id));
        assert!(!fx.manager.reserve(&offer.id));
        assert!(!fx.manager.deactivate(&offer.id));
        assert!(fx.manager.release(&offer.id));
        assert!(fx.manager.deactivate(&offer.id));
        assert!(fx.manager.activate(&offer.id));

        assert!(fx.manager.close_open_offer(&offer.id));
        assert!(!fx.manager.close_open_offer(&offer.id));
        assert_eq!(fx.manager.get(&offer.id).unwrap().state, OpenOfferState::Closed);
    }

    #[test]
    fn test_invalid_offer_rejected() {
        let fx = fixture();
        let mut offer = offer(OfferDirection::Buy, ProtocolKind::Escrow);
        offer.min_amount = offer.amount + 1;
        assert!(matches!(
            fx.manager.place_offer(offer),
            Err(NodeError::InvalidOffer(_))
        ));
        assert!(fx.manager.open_offers().is_empty());
    }

    #[tokio::test]
    async fn test_reserved_offer_reported_taken() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.manager.place_offer(offer.clone()).unwrap();

        assert_eq!(ask(&fx, &offer).await, AvailabilityResult::Available);
        fx.manager.reserve(&offer.id);
        assert_eq!(ask(&fx, &offer).await, AvailabilityResult::OfferTaken);

        // Response and ack per request.
        assert_eq!(fx.bus.sent_envelopes().len(), 4);
    }

    #[tokio::test]
    async fn test_ignored_taker() {
        let fx = fixture();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        fx.manager.place_offer(offer.clone()).unwrap();
        fx.peers.ignore(NodeAddress::new("taker", 9999));

        assert_eq!(ask(&fx, &offer).await, AvailabilityResult::UserIgnored);
    }
}
