//! # Peer Exchange Telemetry
//!
//! Structured logging through `tracing-subscriber` and Prometheus metrics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use px_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // Logs and metrics are now being collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PX_SERVICE_NAME` | `peer-exchange` | Service name in log lines |
//! | `PX_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `PX_LOG_JSON` | `false` | JSON formatted logs |
//! | `PX_METRICS_ENABLED` | `true` | Register Prometheus metrics |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, ACTIVE_TRADES, AVAILABILITY_CHECKS, DISPUTE_RESULTS,
    MESSAGES_SENT, MESSAGE_SEND_FAILURES, MESSAGE_SEND_RETRIES, SWAP_RECONCILIATION_FAILURES,
    TRADES_COMPLETED, TRADES_FAILED, TRADES_STARTED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and, if enabled, metrics. Call once per process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if config.metrics_enabled {
        register_metrics()?;
    }
    logging::init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
