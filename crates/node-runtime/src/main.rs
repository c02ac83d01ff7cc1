//! # Peer Exchange Node
//!
//! Runs one exchange node on a local loopback network with a simulated
//! chain until interrupted.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (`PX_LOG_LEVEL`, `PX_LOG_JSON`, ...)
//! 2. Load and validate configuration (`PX_*` environment variables)
//! 3. Start the node: managers, persisted trades, message router
//! 4. Wait for ctrl-c
//! 5. Stop the trade actors and write the final snapshot

use anyhow::{Context, Result};
use node_runtime::{Environment, ExchangeNode, NodeConfig};
use px_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = NodeConfig::from_env().context("Invalid configuration")?;
    info!(
        host = %config.network.host,
        port = config.network.port,
        data_dir = %config.storage.data_dir.display(),
        persistence = config.storage.persistence_enabled,
        "Configuration loaded"
    );

    let node = ExchangeNode::start(config, &Environment::local())
        .await
        .context("Failed to start node")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    node.shutdown().await.context("Shutdown failed")?;
    if telemetry.metrics_enabled {
        match encode_metrics() {
            Ok(metrics) => debug!(%metrics, "Final metrics"),
            Err(e) => warn!(error = %e, "Encoding metrics failed"),
        }
    }
    Ok(())
}
