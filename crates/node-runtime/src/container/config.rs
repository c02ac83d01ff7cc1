//! # Node Configuration
//!
//! Unified configuration for the exchange services and runtime parameters.
//! Defaults run a local node; `PX_*` environment variables override them.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PX_HOST`, `PX_PORT` | `network.host`, `network.port` |
//! | `PX_TRADE_TIMEOUT_SECS` | `protocol.trade_timeout` |
//! | `PX_AVAILABILITY_TIMEOUT_SECS` | `protocol.availability_timeout` |
//! | `PX_LEDGER_POLL_SECS` | `protocol.ledger_poll_interval` |
//! | `PX_REQUIRED_CONFIRMATIONS` | `protocol.required_confirmations` |
//! | `PX_SEND_RETRIES` | `retry.send_retries` |
//! | `PX_DISPUTE_RETRY_DELAY_MS` | `dispute.result_retry_delay` |
//! | `PX_DISPUTE_MAX_RETRIES` | `dispute.max_result_retries` |
//! | `PX_BTC_NETWORK` | `fees.btc_network` |
//! | `PX_DATA_DIR` | `storage.data_dir` |
//! | `PX_PERSISTENCE_ENABLED` | `storage.persistence_enabled` |

use bitcoin::Network;
use px_03_trade_protocol::ProtocolConfig as TradeProtocolConfig;
use px_04_bsq_swap::{FeeSchedule, SwapConfig};
use px_05_dispute::DisputeConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub protocol: ProtocolConfig,
    pub retry: RetryConfig,
    pub dispute: DisputeConfig,
    pub fees: FeeConfig,
    pub storage: StorageConfig,
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable does not parse.
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// A duration that must be positive is zero.
    #[error("{0} must not be zero")]
    ZeroDuration(&'static str),

    /// A fee rate that must be positive is zero.
    #[error("Fee rate {0} must not be zero")]
    ZeroFeeRate(&'static str),

    #[error("Required confirmations must be at least 1")]
    NoConfirmations,
}

impl NodeConfig {
    /// Defaults overridden by `PX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("PX_HOST") {
            config.network.host = host;
        }
        if let Some(port) = parse(&lookup, "PX_PORT")? {
            config.network.port = port;
        }

        if let Some(secs) = parse(&lookup, "PX_TRADE_TIMEOUT_SECS")? {
            config.protocol.trade_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PX_AVAILABILITY_TIMEOUT_SECS")? {
            config.protocol.availability_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "PX_LEDGER_POLL_SECS")? {
            config.protocol.ledger_poll_interval = Duration::from_secs(secs);
        }
        if let Some(confirmations) = parse(&lookup, "PX_REQUIRED_CONFIRMATIONS")? {
            config.protocol.required_confirmations = confirmations;
        }

        if let Some(retries) = parse(&lookup, "PX_SEND_RETRIES")? {
            config.retry.send_retries = retries;
        }

        if let Some(millis) = parse(&lookup, "PX_DISPUTE_RETRY_DELAY_MS")? {
            config.dispute.result_retry_delay = Duration::from_millis(millis);
        }
        if let Some(retries) = parse(&lookup, "PX_DISPUTE_MAX_RETRIES")? {
            config.dispute.max_result_retries = retries;
        }

        if let Some(network) = lookup("PX_BTC_NETWORK") {
            config.fees.btc_network =
                Network::from_str(&network).map_err(|_| ConfigError::InvalidValue {
                    key: "PX_BTC_NETWORK",
                    value: network,
                })?;
        }

        if let Some(dir) = lookup("PX_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = parse(&lookup, "PX_PERSISTENCE_ENABLED")? {
            config.storage.persistence_enabled = enabled;
        }

        Ok(config)
    }

    /// Reject values no node can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("protocol.trade_timeout", self.protocol.trade_timeout),
            ("protocol.availability_timeout", self.protocol.availability_timeout),
            ("protocol.ledger_poll_interval", self.protocol.ledger_poll_interval),
            ("dispute.result_retry_delay", self.dispute.result_retry_delay),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration(*name));
        }

        if self.protocol.required_confirmations == 0 {
            return Err(ConfigError::NoConfirmations);
        }

        let rates = [
            ("escrow_taker_fee", self.fees.escrow_taker_fee),
            ("bsq_maker_fee_per_btc", self.fees.bsq_maker_fee_per_btc),
            ("bsq_taker_fee_per_btc", self.fees.bsq_taker_fee_per_btc),
            ("tx_fee_per_party", self.fees.tx_fee_per_party),
        ];
        if let Some((name, _)) = rates.iter().find(|(_, rate)| *rate == 0) {
            return Err(ConfigError::ZeroFeeRate(*name));
        }
        Ok(())
    }

    /// Settings of the per-trade protocol actors.
    pub fn trade_protocol(&self) -> TradeProtocolConfig {
        TradeProtocolConfig {
            timeout: self.protocol.trade_timeout,
            required_confirmations: self.protocol.required_confirmations,
            ledger_poll_interval: self.protocol.ledger_poll_interval,
            send_retries: self.retry.send_retries,
            taker_fee: self.fees.escrow_taker_fee,
            ..TradeProtocolConfig::default()
        }
    }

    /// Settings of the BSQ swap flow.
    pub fn swap(&self) -> SwapConfig {
        SwapConfig {
            network: self.fees.btc_network,
            fees: FeeSchedule {
                maker_fee_per_btc: self.fees.bsq_maker_fee_per_btc,
                taker_fee_per_btc: self.fees.bsq_taker_fee_per_btc,
                min_fee: self.fees.bsq_min_fee,
            },
            tx_fee_per_party: self.fees.tx_fee_per_party,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Host part of this node's address.
    pub host: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9999,
        }
    }
}

/// Trade protocol timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Time a waiting protocol step may take before the trade fails.
    pub trade_timeout: Duration,
    /// Time the taker waits for the maker's availability verdict.
    pub availability_timeout: Duration,
    /// Interval of the deposit confirmation poll.
    pub ledger_poll_interval: Duration,
    pub required_confirmations: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            trade_timeout: Duration::from_secs(60),
            availability_timeout: Duration::from_secs(10),
            ledger_poll_interval: Duration::from_secs(10),
            required_confirmations: 1,
        }
    }
}

/// Message delivery retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after a failed mailbox send.
    pub send_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { send_retries: 1 }
    }
}

/// Trade fees and the bitcoin network addresses are checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeConfig {
    /// Escrow taker fee in satoshis.
    pub escrow_taker_fee: u64,
    /// BSQ swap maker fee per BTC traded.
    pub bsq_maker_fee_per_btc: u64,
    /// BSQ swap taker fee per BTC traded.
    pub bsq_taker_fee_per_btc: u64,
    /// Floor of either BSQ fee.
    pub bsq_min_fee: u64,
    /// Mining fee share of each swap party, in satoshis.
    pub tx_fee_per_party: u64,
    pub btc_network: Network,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let schedule = FeeSchedule::default();
        Self {
            escrow_taker_fee: TradeProtocolConfig::default().taker_fee,
            bsq_maker_fee_per_btc: schedule.maker_fee_per_btc,
            bsq_taker_fee_per_btc: schedule.taker_fee_per_btc,
            bsq_min_fee: schedule.min_fee,
            tx_fee_per_party: SwapConfig::default().tx_fee_per_party,
            btc_network: Network::Regtest,
        }
    }
}

/// Trade persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the trade snapshot.
    pub data_dir: PathBuf,
    pub persistence_enabled: bool,
    /// Quiet period after a persistence request before the snapshot is written.
    pub persist_debounce: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./px-data"),
            persistence_enabled: true,
            persist_debounce: Duration::from_millis(200),
        }
    }
}
