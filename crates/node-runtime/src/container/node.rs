//! # Exchange Node
//!
//! One trading node: its bus endpoint, wallet, managers and background
//! tasks, wired from a [`NodeConfig`].
//!
//! ## Startup
//!
//! 1. Validate the configuration
//! 2. Join the network and open the wallet
//! 3. Build the managers (offers, trades, disputes)
//! 4. Resume persisted trades and start the persistence writer
//! 5. Start the message router
//!
//! ## Shutdown
//!
//! Router first so no new work arrives, then the trade actors and the
//! pending dispute retries, then one final snapshot.

use parking_lot::Mutex;
use px_02_offer_availability::ports::{IgnoreList, OfferOwnerResolver, StaticAgents};
use px_02_offer_availability::{AvailabilityConfig, OfferAvailabilityService};
use px_03_trade_protocol::{ProtocolServices, TradeAction};
use px_05_dispute::DisputeManager;
use shared_bus::InMemoryEventBus;
use shared_crypto::KeyRing;
use shared_types::ports::{PersistenceRequester, StaticPriceFeed};
use shared_types::{NodeAddress, Offer, SupportType, Trade, TradeId};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::{
    load_snapshot, spawn_metrics_recorder, write_snapshot, JsonFilePersistence, LoopbackBus,
    LoopbackNetwork, NoPersistence, SimulatedLedger, SimulatedWallet, SnapshotSource,
};
use crate::container::NodeConfig;
use crate::error::NodeError;
use crate::handlers::MessageRouter;
use crate::managers::{OpenOfferManager, TradeManager};

/// What nodes share: the network, the chain, the dispute agents and prices.
#[derive(Clone)]
pub struct Environment {
    pub network: Arc<LoopbackNetwork>,
    pub ledger: Arc<SimulatedLedger>,
    pub agents: StaticAgents,
    pub prices: Arc<StaticPriceFeed>,
}

impl Environment {
    /// Fresh network and chain, agents at `mediator:1` and `refund-agent:1`.
    pub fn local() -> Self {
        Self {
            network: LoopbackNetwork::new(),
            ledger: Arc::new(SimulatedLedger::new()),
            agents: StaticAgents {
                mediator: Some(NodeAddress::new("mediator", 1)),
                refund_agent: Some(NodeAddress::new("refund-agent", 1)),
            },
            prices: Arc::new(StaticPriceFeed::default()),
        }
    }
}

pub struct ExchangeNode {
    address: NodeAddress,
    key_ring: Arc<KeyRing>,
    bus: Arc<LoopbackBus>,
    wallet: Arc<SimulatedWallet>,
    events: Arc<InMemoryEventBus>,
    offers: Arc<OpenOfferManager>,
    trades: Arc<TradeManager>,
    disputes: Arc<DisputeManager>,
    snapshot_path: Option<PathBuf>,
    shutdown: watch::Sender<bool>,
    router: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ExchangeNode {
    pub async fn start(config: NodeConfig, env: &Environment) -> Result<Self, NodeError> {
        config.validate()?;
        let address = NodeAddress::new(config.network.host.clone(), config.network.port);
        info!(address = %address, network = ?config.fees.btc_network, "Starting exchange node");

        let bus = env.network.join(address.clone());
        let wallet = Arc::new(SimulatedWallet::new(
            address.to_string(),
            config.fees.btc_network,
            env.ledger.clone(),
        ));
        let events = Arc::new(InMemoryEventBus::new());
        let key_ring = Arc::new(KeyRing::generate());
        let mut background = vec![spawn_metrics_recorder(&events)];

        let (persistence, writer, snapshot_path) = if config.storage.persistence_enabled {
            let (json, writer) =
                JsonFilePersistence::new(&config.storage.data_dir, config.storage.persist_debounce);
            let path = json.path().to_path_buf();
            let persistence: Arc<dyn PersistenceRequester> = json;
            (persistence, Some(writer), Some(path))
        } else {
            let persistence: Arc<dyn PersistenceRequester> = Arc::new(NoPersistence);
            (persistence, None, None)
        };

        let services = ProtocolServices {
            bus: bus.clone(),
            wallet: wallet.clone(),
            ledger: env.ledger.clone(),
            persistence: persistence.clone(),
            events: events.clone(),
            key_ring: key_ring.clone(),
            account_id: format!("{address}-account"),
            config: config.trade_protocol(),
        };

        let offers = Arc::new(OpenOfferManager::new(
            bus.clone(),
            Arc::new(env.agents.clone()),
            Arc::new(IgnoreList::default()),
            env.prices.clone(),
        ));
        let availability = OfferAvailabilityService::new(
            bus.clone(),
            Arc::new(OfferOwnerResolver),
            events.clone(),
            key_ring.pub_key_hex(),
            AvailabilityConfig {
                timeout: config.protocol.availability_timeout,
                ..AvailabilityConfig::default()
            },
        );
        let trades = TradeManager::new(
            services,
            config.swap(),
            availability,
            offers.clone(),
            env.prices.clone(),
        );
        let disputes = DisputeManager::new(
            config.dispute.clone(),
            bus.clone(),
            trades.clone(),
            offers.clone(),
            persistence,
            events.clone(),
        );

        if let (Some(path), Some(writer)) = (&snapshot_path, writer) {
            let persisted = load_snapshot(path).await?;
            if !persisted.is_empty() {
                let resumed = trades.restore(persisted);
                info!(path = %path.display(), resumed, "Persisted trades restored");
            }
            let weak = Arc::downgrade(&trades);
            let source: Weak<dyn SnapshotSource> = weak;
            background.push(writer.spawn(source));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let router = MessageRouter::new(bus.clone(), offers.clone(), trades.clone(), disputes.clone());
        let router = tokio::spawn(router.run(shutdown_rx));

        info!(address = %address, "Exchange node running");
        Ok(Self {
            address,
            key_ring,
            bus,
            wallet,
            events,
            offers,
            trades,
            disputes,
            snapshot_path,
            shutdown,
            router: Mutex::new(Some(router)),
            background: Mutex::new(background),
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn bus(&self) -> &Arc<LoopbackBus> {
        &self.bus
    }

    pub fn wallet(&self) -> &Arc<SimulatedWallet> {
        &self.wallet
    }

    pub fn events(&self) -> &Arc<InMemoryEventBus> {
        &self.events
    }

    pub fn offers(&self) -> &Arc<OpenOfferManager> {
        &self.offers
    }

    pub fn trades(&self) -> &Arc<TradeManager> {
        &self.trades
    }

    pub fn disputes(&self) -> &Arc<DisputeManager> {
        &self.disputes
    }

    /// Publish `offer` as this node's. Returns the offer as peers see it.
    pub fn place_offer(&self, mut offer: Offer) -> Result<Offer, NodeError> {
        offer.owner = self.address.clone();
        offer.owner_pub_key = self.key_ring.pub_key_hex();
        self.offers.place_offer(offer.clone())?;
        Ok(offer)
    }

    pub async fn take_offer(&self, offer: Offer, amount: u64) -> Result<TradeId, NodeError> {
        let handle = self.trades.take_offer(offer, amount).await?;
        Ok(handle.trade_id())
    }

    pub async fn act(&self, trade_id: &TradeId, action: TradeAction) -> Result<(), NodeError> {
        self.trades.act(trade_id, action).await
    }

    pub async fn open_dispute(
        &self,
        trade_id: TradeId,
        support_type: SupportType,
    ) -> Result<(), NodeError> {
        self.disputes
            .open_dispute(trade_id, support_type)
            .await
            .map_err(NodeError::from)
    }

    pub fn trade(&self, trade_id: &TradeId) -> Option<Trade> {
        self.trades.trade(trade_id)
    }

    /// Stop routing, stop the trades and write the final snapshot.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        info!(address = %self.address, "Shutting down exchange node");
        let _ = self.shutdown.send(true);
        let router = self.router.lock().take();
        if let Some(router) = router {
            if let Err(e) = router.await {
                warn!(error = %e, "Message router ended abnormally");
            }
        }

        self.trades.shutdown().await;
        self.disputes.shutdown();
        for task in self.background.lock().drain(..) {
            task.abort();
        }

        if let Some(path) = &self.snapshot_path {
            let count = write_snapshot(path, self.trades.snapshot()).await?;
            info!(path = %path.display(), trades = count, "Final snapshot written");
        }
        info!(address = %self.address, "Exchange node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::fixtures::offer;
    use shared_types::{OfferDirection, ProtocolKind};
    use std::time::Duration;

    fn config(port: u16, data_dir: Option<PathBuf>) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.network.port = port;
        match data_dir {
            Some(dir) => {
                config.storage.data_dir = dir;
                config.storage.persist_debounce = Duration::from_millis(10);
            }
            None => config.storage.persistence_enabled = false,
        }
        config
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("px-node-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = config(7001, None);
        config.protocol.required_confirmations = 0;
        let result = ExchangeNode::start(config, &Environment::local()).await;
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_placed_offer_owned_by_node() {
        let node = ExchangeNode::start(config(7002, None), &Environment::local())
            .await
            .unwrap();
        let placed = node
            .place_offer(offer(OfferDirection::Sell, ProtocolKind::Escrow))
            .unwrap();

        assert_eq!(&placed.owner, node.address());
        assert_eq!(node.offers().get(&placed.id).unwrap().offer, placed);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_written_on_shutdown_and_restored() {
        let dir = temp_dir("restore");
        let env = Environment::local();
        let node = ExchangeNode::start(config(7003, Some(dir.clone())), &env)
            .await
            .unwrap();
        let trade = Trade::new(
            offer(OfferDirection::Buy, ProtocolKind::Escrow),
            shared_types::TradeRole::BuyerAsMaker,
            shared_types::COIN,
            2_000_000,
            NodeAddress::new("taker", 9999),
        );
        node.trades().restore(vec![trade.clone()]);
        node.shutdown().await.unwrap();

        let restarted = ExchangeNode::start(config(7004, Some(dir.clone())), &env)
            .await
            .unwrap();
        assert!(restarted.trades().handle(&trade.id).is_some());
        restarted.shutdown().await.unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }
}
