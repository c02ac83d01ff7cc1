//! # Scenario Harness
//!
//! Two trading nodes on a fresh `Environment`, plus a scripted endpoint for
//! the dispute agent. Waiting is done by polling with virtual-time sleeps.

use node_runtime::adapters::LoopbackBus;
use node_runtime::{Environment, ExchangeNode, NodeConfig, NodeError};
use parking_lot::Mutex;
use shared_types::fixtures::offer;
use shared_types::ports::{MessageBus, MessageListener, SendOutcome};
use shared_types::{
    Asset, ExchangeMessage, NetworkEnvelope, NetworkError, NodeAddress, Offer, OfferDirection,
    ProtocolKind, Trade, TradeId, TradePhase, COIN,
};
use std::sync::Arc;
use std::time::Duration;

pub const MAKER_PORT: u16 = 9001;
pub const TAKER_PORT: u16 = 9002;

/// Polling rounds before `eventually` gives up (20 s virtual).
const POLL_ROUNDS: usize = 400;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Local node config without persistence, polling the chain every second.
pub fn node_config(port: u16) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.port = port;
    config.storage.persistence_enabled = false;
    config.protocol.ledger_poll_interval = Duration::from_secs(1);
    config
}

pub async fn start_node(env: &Environment, port: u16) -> Result<ExchangeNode, NodeError> {
    ExchangeNode::start(node_config(port), env).await
}

/// Poll `check` until it holds. Panics after 20 s of virtual time.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..POLL_ROUNDS {
        if check() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("Timed out waiting for {what}");
}

/// Wait until `node` holds trade `trade_id` matching `pred`; returns it.
pub async fn wait_for_trade(
    node: &ExchangeNode,
    trade_id: &TradeId,
    what: &str,
    pred: impl Fn(&Trade) -> bool,
) -> Trade {
    eventually(what, || node.trade(trade_id).is_some_and(|t| pred(&t))).await;
    node.trade(trade_id)
        .unwrap_or_else(|| panic!("Trade {trade_id} vanished while waiting for {what}"))
}

/// Maker and taker on one network and chain.
pub struct Market {
    pub env: Environment,
    pub maker: ExchangeNode,
    pub taker: ExchangeNode,
}

impl Market {
    /// Start both nodes. The maker holds 10 BTC, the taker 1 BTC.
    pub async fn start() -> Result<Self, NodeError> {
        let env = Environment::local();
        let maker = start_node(&env, MAKER_PORT).await?;
        let taker = start_node(&env, TAKER_PORT).await?;
        maker.wallet().fund(Asset::Btc, 10 * COIN);
        taker.wallet().fund(Asset::Btc, COIN);
        Ok(Self { env, maker, taker })
    }

    /// The maker places a sell offer of `protocol`.
    pub fn place_sell_offer(&self, protocol: ProtocolKind) -> Result<Offer, NodeError> {
        self.maker.place_offer(offer(OfferDirection::Sell, protocol))
    }

    /// Take a fresh escrow sell offer for half a coin and run it until both
    /// sides see the deposit confirmed.
    pub async fn confirmed_escrow_trade(&self) -> Result<(Offer, TradeId), NodeError> {
        let offer = self.place_sell_offer(ProtocolKind::Escrow)?;
        let trade_id = self.taker.take_offer(offer.clone(), COIN / 2).await?;

        wait_for_trade(&self.taker, &trade_id, "deposit published", |t| {
            t.phase() >= TradePhase::DepositPublished
        })
        .await;
        wait_for_trade(&self.maker, &trade_id, "maker saw deposit", |t| {
            t.phase() >= TradePhase::DepositPublished
        })
        .await;

        self.env.ledger.mine_block();
        for node in [&self.maker, &self.taker] {
            wait_for_trade(node, &trade_id, "deposit confirmed", |t| {
                t.phase() == TradePhase::DepositConfirmed
            })
            .await;
        }
        Ok((offer, trade_id))
    }

    pub async fn shutdown(&self) {
        for node in [&self.maker, &self.taker] {
            if let Err(e) = node.shutdown().await {
                panic!("Node {} did not shut down cleanly: {e}", node.address());
            }
        }
    }
}

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<NetworkEnvelope>>,
}

impl MessageListener for Recorder {
    fn on_message(&self, envelope: &NetworkEnvelope) {
        self.received.lock().push(envelope.clone());
    }
}

/// A dispute agent endpoint that records what it receives and sends
/// whatever the scenario scripts.
pub struct Agent {
    bus: Arc<LoopbackBus>,
    inbox: Arc<Recorder>,
}

impl Agent {
    /// Join `env` as the refund agent.
    pub fn refund_agent(env: &Environment) -> Self {
        Self::join(env, NodeAddress::new("refund-agent", 1))
    }

    pub fn join(env: &Environment, address: NodeAddress) -> Self {
        let bus = env.network.join(address);
        let inbox = Arc::new(Recorder::default());
        bus.add_listener(inbox.clone());
        Self { bus, inbox }
    }

    pub fn address(&self) -> NodeAddress {
        self.bus.my_address()
    }

    pub fn received(&self) -> Vec<NetworkEnvelope> {
        self.inbox.received.lock().clone()
    }

    pub async fn send(
        &self,
        to: &NodeAddress,
        message: ExchangeMessage,
    ) -> Result<SendOutcome, NetworkError> {
        let envelope = NetworkEnvelope::new(self.address(), message);
        self.bus.send(to, envelope).await
    }
}
