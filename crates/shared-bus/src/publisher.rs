//! # Event Publisher
//!
//! Trade actors, the dispute manager and the availability service report
//! through `EventPublisher`. The node wires an `InMemoryEventBus`; protocol
//! unit tests wire a `RecordingPublisher` and inspect what was reported.

use crate::events::{EventFilter, ExchangeEvent};
use crate::subscriber::{Subscription, TradeWatch};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::TradeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Sink for observable exchange events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Report `event`. Returns how many subscribers it reached.
    async fn publish(&self, event: ExchangeEvent) -> usize;

    /// Events reported so far.
    fn events_published(&self) -> u64;
}

pub(crate) type TradeWatchers = Arc<RwLock<HashMap<TradeId, usize>>>;

/// Broadcast bus shared by all subsystems of one node.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<ExchangeEvent>,
    /// Live trade-scoped subscriptions, per trade.
    watchers: TradeWatchers,
    published: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// A bus whose subscribers lag after `capacity` unread events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            watchers: Arc::new(RwLock::new(HashMap::new())),
            published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe with `filter`. A filter scoped to one trade registers a
    /// watcher on that trade until the subscription is dropped.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let watch = filter
            .trade_id
            .map(|trade_id| TradeWatch::register(self.watchers.clone(), trade_id));
        debug!(
            topics = ?filter.topics,
            trade_id = ?filter.trade_id,
            "Event subscription opened"
        );
        Subscription::new(self.sender.subscribe(), filter, watch)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of open subscriptions scoped to `trade_id`.
    #[must_use]
    pub fn watchers_of(&self, trade_id: &TradeId) -> usize {
        self.watchers.read().get(trade_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: ExchangeEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let topic = event.topic();
        let trade_id = event.trade_id();

        match self.sender.send(event) {
            Ok(reached) => {
                debug!(topic = ?topic, trade_id = ?trade_id, reached, "Exchange event published");
                reached
            }
            Err(_) => {
                trace!(topic = ?topic, trade_id = ?trade_id, "Exchange event had no subscribers");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Keeps every reported event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ExchangeEvent>>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ExchangeEvent> {
        self.events.lock().clone()
    }

    /// Whether any recorded event satisfies `pred`.
    pub fn any(&self, pred: impl Fn(&ExchangeEvent) -> bool) -> bool {
        self.events.lock().iter().any(pred)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ExchangeEvent) -> usize {
        self.events.lock().push(event);
        1
    }

    fn events_published(&self) -> u64 {
        self.events.lock().len() as u64
    }
}
