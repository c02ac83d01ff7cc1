//! # Event Subscriber
//!
//! Defines the subscription side of the event bus.

use crate::events::{EventFilter, ExchangeEvent};
use crate::publisher::TradeWatchers;
use shared_types::TradeId;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed.
    #[error("Event bus closed")]
    Closed,
}

/// Registration of a trade-scoped subscription, released on drop.
pub(crate) struct TradeWatch {
    watchers: TradeWatchers,
    trade_id: TradeId,
}

impl TradeWatch {
    pub(crate) fn register(watchers: TradeWatchers, trade_id: TradeId) -> Self {
        *watchers.write().entry(trade_id).or_insert(0) += 1;
        Self { watchers, trade_id }
    }
}

impl Drop for TradeWatch {
    fn drop(&mut self) {
        let mut watchers = self.watchers.write();
        if let Some(count) = watchers.get_mut(&self.trade_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                watchers.remove(&self.trade_id);
            }
        }
        debug!(trade_id = %self.trade_id, "Trade subscription closed");
    }
}

/// A subscription handle for receiving events.
pub struct Subscription {
    receiver: broadcast::Receiver<ExchangeEvent>,
    filter: EventFilter,
    _watch: Option<TradeWatch>,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ExchangeEvent>,
        filter: EventFilter,
        watch: Option<TradeWatch>,
    ) -> Self {
        Self {
            receiver,
            filter,
            _watch: watch,
        }
    }

    /// Receive the next event that matches the filter.
    ///
    /// Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ExchangeEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Try to receive the next matching event without blocking.
    pub fn try_recv(&mut self) -> Result<Option<ExchangeEvent>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}
