//! Swap configuration: fee schedule, network and mining fee share.

use bitcoin::Network;
use shared_types::COIN;

/// BSQ trade fees, charged per BTC traded with a floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Maker fee in BSQ units per BTC of trade amount.
    pub maker_fee_per_btc: u64,
    /// Taker fee in BSQ units per BTC of trade amount.
    pub taker_fee_per_btc: u64,
    /// Minimum fee per party in BSQ units.
    pub min_fee: u64,
}

impl FeeSchedule {
    pub fn maker_fee(&self, btc_amount: u64) -> u64 {
        Self::fee(self.maker_fee_per_btc, self.min_fee, btc_amount)
    }

    pub fn taker_fee(&self, btc_amount: u64) -> u64 {
        Self::fee(self.taker_fee_per_btc, self.min_fee, btc_amount)
    }

    fn fee(rate_per_btc: u64, min_fee: u64, btc_amount: u64) -> u64 {
        let fee = u128::from(rate_per_btc) * u128::from(btc_amount) / u128::from(COIN);
        u64::try_from(fee).unwrap_or(u64::MAX).max(min_fee)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_fee_per_btc: 5_000,
            taker_fee_per_btc: 15_000,
            min_fee: 500,
        }
    }
}

/// Swap protocol configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapConfig {
    /// Network addresses must decode for.
    pub network: Network,
    pub fees: FeeSchedule,
    /// Mining fee each party pays, in satoshis.
    pub tx_fee_per_party: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            fees: FeeSchedule::default(),
            tx_fee_per_party: 2_000,
        }
    }
}
