//! Trade protocol configuration

use std::time::Duration;

/// Default protocol timeout.
pub const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between ledger polls.
pub const DEFAULT_LEDGER_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Tuning shared by all trade protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Time a started protocol step may take before the trade is failed.
    pub timeout: Duration,
    /// Confirmations after which a deposit counts as confirmed.
    pub required_confirmations: u32,
    /// Ledger polling interval for deposit confirmation and reorgs.
    pub ledger_poll_interval: Duration,
    /// Extra attempts after a failed mailbox send.
    pub send_retries: u32,
    /// Taker fee of an escrow trade, in satoshis.
    pub taker_fee: u64,
    /// Capacity of each trade's command queue.
    pub command_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROTOCOL_TIMEOUT,
            required_confirmations: 1,
            ledger_poll_interval: DEFAULT_LEDGER_POLL_INTERVAL,
            send_retries: 1,
            taker_fee: 5_000,
            command_capacity: 64,
        }
    }
}
