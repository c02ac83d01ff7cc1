//! Prometheus metrics for the exchange node.
//!
//! All metrics follow the naming convention: `px_<area>_<metric>[_total]`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRADE METRICS
    // =========================================================================

    /// Trades started, by protocol (escrow/bsq_swap)
    pub static ref TRADES_STARTED: CounterVec = CounterVec::new(
        Opts::new("px_trades_started_total", "Trades started"),
        &["protocol"]
    ).expect("metric creation failed");

    /// Trades that completed their protocol
    pub static ref TRADES_COMPLETED: Counter = Counter::new(
        "px_trades_completed_total",
        "Trades that completed their protocol"
    ).expect("metric creation failed");

    /// Failed trades, by error kind
    pub static ref TRADES_FAILED: CounterVec = CounterVec::new(
        Opts::new("px_trades_failed_total", "Trades that failed"),
        &["kind"]
    ).expect("metric creation failed");

    /// Trades whose actor is running
    pub static ref ACTIVE_TRADES: Gauge = Gauge::new(
        "px_trades_active",
        "Trades with a running protocol actor"
    ).expect("metric creation failed");

    // =========================================================================
    // MESSAGING METRICS
    // =========================================================================

    /// Peer messages sent, by message type
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("px_messages_sent_total", "Peer messages sent"),
        &["message"]
    ).expect("metric creation failed");

    /// Peer messages whose delivery failed
    pub static ref MESSAGE_SEND_FAILURES: CounterVec = CounterVec::new(
        Opts::new("px_message_send_failures_total", "Peer messages whose delivery failed"),
        &["message"]
    ).expect("metric creation failed");

    /// Peer messages sent a second time
    pub static ref MESSAGE_SEND_RETRIES: CounterVec = CounterVec::new(
        Opts::new("px_message_send_retries_total", "Peer messages sent again after a failure"),
        &["message"]
    ).expect("metric creation failed");

    // =========================================================================
    // OFFER AND SWAP METRICS
    // =========================================================================

    /// Availability checks, by result
    pub static ref AVAILABILITY_CHECKS: CounterVec = CounterVec::new(
        Opts::new("px_availability_checks_total", "Offer availability checks"),
        &["result"]
    ).expect("metric creation failed");

    /// Swap transactions rejected by reconciliation
    pub static ref SWAP_RECONCILIATION_FAILURES: Counter = Counter::new(
        "px_swap_reconciliation_failures_total",
        "Swap transactions rejected because inputs and outputs did not balance"
    ).expect("metric creation failed");

    // =========================================================================
    // DISPUTE METRICS
    // =========================================================================

    /// Dispute results, by outcome (applied/retried/dropped)
    pub static ref DISPUTE_RESULTS: CounterVec = CounterVec::new(
        Opts::new("px_dispute_results_total", "Dispute result messages"),
        &["outcome"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call twice.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Trades
        Box::new(TRADES_STARTED.clone()),
        Box::new(TRADES_COMPLETED.clone()),
        Box::new(TRADES_FAILED.clone()),
        Box::new(ACTIVE_TRADES.clone()),
        // Messaging
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGE_SEND_FAILURES.clone()),
        Box::new(MESSAGE_SEND_RETRIES.clone()),
        // Offers and swaps
        Box::new(AVAILABILITY_CHECKS.clone()),
        Box::new(SWAP_RECONCILIATION_FAILURES.clone()),
        // Disputes
        Box::new(DISPUTE_RESULTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
