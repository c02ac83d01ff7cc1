//! Event bus subscriber feeding the Prometheus counters.

use px_telemetry::{
    metric_inc, AVAILABILITY_CHECKS, DISPUTE_RESULTS, MESSAGE_SEND_RETRIES,
    SWAP_RECONCILIATION_FAILURES, TRADES_COMPLETED, TRADES_FAILED,
};
use shared_bus::{EventFilter, ExchangeEvent, InMemoryEventBus};
use tokio::task::JoinHandle;
use tracing::debug;

/// Start recording every event published on `bus`.
pub fn spawn_metrics_recorder(bus: &InMemoryEventBus) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(EventFilter::all());
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            record(&event);
        }
        debug!("Metrics recorder stopped");
    })
}

/// Count one event.
pub fn record(event: &ExchangeEvent) {
    match event {
        ExchangeEvent::TradeCompleted { .. } => metric_inc!(TRADES_COMPLETED),
        ExchangeEvent::TradeFailed { kind, error, .. } => {
            let kind = format!("{kind:?}");
            metric_inc!(TRADES_FAILED, &[kind.as_str()]);
            if is_reconciliation_failure(error) {
                metric_inc!(SWAP_RECONCILIATION_FAILURES);
            }
        }
        ExchangeEvent::MessageSendRetried { message, .. } => {
            metric_inc!(MESSAGE_SEND_RETRIES, &[message.as_str()]);
        }
        ExchangeEvent::OfferAvailabilityChecked { result, .. } => {
            let result = format!("{result:?}");
            metric_inc!(AVAILABILITY_CHECKS, &[result.as_str()]);
        }
        ExchangeEvent::DisputeResultApplied { .. } => metric_inc!(DISPUTE_RESULTS, &["applied"]),
        ExchangeEvent::DisputeResultDeferred { .. } => {
            metric_inc!(DISPUTE_RESULTS, &["deferred"]);
        }
        ExchangeEvent::DisputeResultDropped { .. } => metric_inc!(DISPUTE_RESULTS, &["dropped"]),
        _ => {}
    }
}

fn is_reconciliation_failure(error: &str) -> bool {
    error.starts_with("BSQ balance mismatch") || error.starts_with("Negative transaction fee")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{ErrorKind, OfferId, ProtocolError, TradeId};

    #[test]
    fn test_dispute_outcomes_counted() {
        let trade_id = TradeId::for_offer(&OfferId::new());
        let before = DISPUTE_RESULTS.with_label_values(&["dropped"]).get();
        record(&ExchangeEvent::DisputeResultDropped { trade_id });
        assert_eq!(DISPUTE_RESULTS.with_label_values(&["dropped"]).get(), before + 1.0);
    }

    #[test]
    fn test_reconciliation_failure_recognised() {
        let mismatch = ProtocolError::BalanceMismatch {
            bsq_in: 10,
            bsq_out: 9,
            bsq_trade_fee: 2,
        };
        let negative = ProtocolError::NegativeTxFee {
            btc_in: 1,
            btc_out: 2,
        };
        assert!(is_reconciliation_failure(&mismatch.to_string()));
        assert!(is_reconciliation_failure(&negative.to_string()));
        assert!(!is_reconciliation_failure(&ProtocolError::Timeout(60).to_string()));

        let before = SWAP_RECONCILIATION_FAILURES.get();
        record(&ExchangeEvent::TradeFailed {
            trade_id: TradeId::for_offer(&OfferId::new()),
            kind: ErrorKind::ProtocolViolation,
            error: mismatch.to_string(),
        });
        assert_eq!(SWAP_RECONCILIATION_FAILURES.get(), before + 1.0);
    }
}
