//! Managers wired to mocks, for unit tests.

use super::{OpenOfferManager, TradeManager};
use px_02_offer_availability::ports::{IgnoreList, OfferOwnerResolver, StaticAgents};
use px_02_offer_availability::{AvailabilityConfig, OfferAvailabilityService};
use px_03_trade_protocol::{ProtocolConfig, ProtocolServices};
use px_04_bsq_swap::SwapConfig;
use px_05_dispute::{DisputeConfig, DisputeManager};
use shared_bus::RecordingPublisher;
use shared_crypto::KeyRing;
use shared_types::ports::{
    MockLedger, MockMessageBus, MockWallet, RecordingPersistence, StaticPriceFeed,
};
use shared_types::NodeAddress;
use std::sync::Arc;

pub(crate) struct Managers {
    pub bus: Arc<MockMessageBus>,
    pub ledger: Arc<MockLedger>,
    pub persistence: Arc<RecordingPersistence>,
    pub events: Arc<RecordingPublisher>,
    pub open_offers: Arc<OpenOfferManager>,
    pub trades: Arc<TradeManager>,
    pub disputes: Arc<DisputeManager>,
}

impl Managers {
    pub fn new(host: &str) -> Self {
        let bus = Arc::new(MockMessageBus::new(NodeAddress::new(host, 9999)));
        let ledger = Arc::new(MockLedger::new());
        let persistence = Arc::new(RecordingPersistence::default());
        let events = Arc::new(RecordingPublisher::new());
        let prices = Arc::new(StaticPriceFeed::default());
        let key_ring = Arc::new(KeyRing::from_seed([1; 32]));

        let services = ProtocolServices {
            bus: bus.clone(),
            wallet: Arc::new(MockWallet::new(host)),
            ledger: ledger.clone(),
            persistence: persistence.clone(),
            events: events.clone(),
            key_ring: key_ring.clone(),
            account_id: format!("{host}-account"),
            config: ProtocolConfig::default(),
        };
        let agents = StaticAgents {
            mediator: Some(NodeAddress::new("mediator", 1)),
            refund_agent: Some(NodeAddress::new("refund-agent", 1)),
        };
        let open_offers = Arc::new(OpenOfferManager::new(
            bus.clone(),
            Arc::new(agents),
            Arc::new(IgnoreList::default()),
            prices.clone(),
        ));
        let availability = OfferAvailabilityService::new(
            bus.clone(),
            Arc::new(OfferOwnerResolver),
            events.clone(),
            key_ring.pub_key_hex(),
            AvailabilityConfig::default(),
        );
        let trades = TradeManager::new(
            services,
            SwapConfig::default(),
            availability,
            open_offers.clone(),
            prices,
        );
        let disputes = DisputeManager::new(
            DisputeConfig::default(),
            bus.clone(),
            trades.clone(),
            open_offers.clone(),
            persistence.clone(),
            events.clone(),
        );

        Self {
            bus,
            ledger,
            persistence,
            events,
            open_offers,
            trades,
            disputes,
        }
    }
}
