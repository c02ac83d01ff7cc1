//! # Message Router
//!
//! Single consumer of everything the bus delivers to this node.
//!
//! ```text
//! bus ──listener──→ inbox ──→ uid cache ──┬─→ OfferAvailabilityRequest → OpenOfferManager
//!                                         ├─→ trade messages           → TradeManager
//!                                         ├─→ dispute messages         → DisputeManager
//!                                         └─→ acks, responses          → logged / ignored
//! ```
//!
//! Envelopes are handled one at a time in arrival order. A uid seen before is
//! dropped, so a retried send or a mailbox copy of a direct message runs
//! its protocol step once.

use px_05_dispute::DisputeManager;
use shared_bus::MessageUidCache;
use shared_types::ports::{ListenerId, MessageBus, MessageListener};
use shared_types::{ExchangeMessage, NetworkEnvelope};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::managers::{OpenOfferManager, TradeManager};

struct Inbox {
    tx: mpsc::UnboundedSender<NetworkEnvelope>,
}

impl MessageListener for Inbox {
    fn on_message(&self, envelope: &NetworkEnvelope) {
        // The router is gone when this fails.
        let _ = self.tx.send(envelope.clone());
    }
}

pub struct MessageRouter {
    bus: Arc<dyn MessageBus>,
    listener: ListenerId,
    inbox: mpsc::UnboundedReceiver<NetworkEnvelope>,
    seen: MessageUidCache,
    offers: Arc<OpenOfferManager>,
    trades: Arc<TradeManager>,
    disputes: Arc<DisputeManager>,
}

impl MessageRouter {
    /// Register on `bus`. Envelopes queue up until [`run`](Self::run).
    pub fn new(
        bus: Arc<dyn MessageBus>,
        offers: Arc<OpenOfferManager>,
        trades: Arc<TradeManager>,
        disputes: Arc<DisputeManager>,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let listener = bus.add_listener(Arc::new(Inbox { tx }));
        Self {
            bus,
            listener,
            inbox,
            seen: MessageUidCache::new(),
            offers,
            trades,
            disputes,
        }
    }

    /// Route until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(address = %self.bus.my_address(), "Message router started");
        loop {
            tokio::select! {
                Some(envelope) = self.inbox.recv() => self.route(envelope).await,
                _ = shutdown.changed() => break,
            }
        }
        self.bus.remove_listener(self.listener);
        info!("Message router stopped");
    }

    async fn route(&mut self, envelope: NetworkEnvelope) {
        if let Err(e) = self.seen.check_and_insert(envelope.uid) {
            debug!(sender = %envelope.sender, message = envelope.name(), "{e}");
            return;
        }

        match &envelope.message {
            ExchangeMessage::OfferAvailabilityRequest(request) => {
                let result = self.offers.handle_availability_request(&envelope, request).await;
                debug!(offer_id = %request.offer_id, result = ?result, "Availability request answered");
            }
            // Consumed by the taker's pending availability check.
            ExchangeMessage::OfferAvailabilityResponse(_) => {}
            ExchangeMessage::PeerOpenedDispute(_)
            | ExchangeMessage::DisputeChat(_)
            | ExchangeMessage::DisputeResult(_) => {
                let name = envelope.name();
                let sender = envelope.sender.clone();
                if let Err(e) = self.disputes.handle(envelope).await {
                    warn!(sender = %sender, message = name, error = %e, "Dispute message not handled");
                }
            }
            ExchangeMessage::DisputeOpened(_) => {
                warn!(sender = %envelope.sender, "Ignoring DisputeOpened, this node is not a dispute agent");
            }
            ExchangeMessage::Ack(ack) => {
                debug!(
                    sender = %envelope.sender,
                    source_msg = %ack.source_msg,
                    source_uid = %ack.source_uid,
                    success = ack.success,
                    error = ?ack.error_message,
                    "Ack received"
                );
            }
            _ => {
                let name = envelope.name();
                if let Err(e) = self.trades.handle_message(envelope).await {
                    debug!(message = name, error = %e, "Trade message not handled");
                }
            }
        }
    }
}
