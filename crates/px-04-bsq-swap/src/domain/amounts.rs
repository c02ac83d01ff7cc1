//! Trade amounts and per-party contributions of a swap.
//!
//! The BTC buyer pays BSQ (trade amount plus own fee) and receives the BTC
//! amount minus its mining fee share. The BTC seller pays BTC (amount plus
//! its mining fee share) and receives the BSQ amount minus its own fee.

use crate::config::SwapConfig;
use shared_types::{Asset, Offer, ProtocolError, Trade, TxInput, TxOutput};

/// Amounts both parties derive independently from the trade terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapAmounts {
    pub btc_amount: u64,
    pub bsq_trade_amount: u64,
    pub maker_fee: u64,
    pub taker_fee: u64,
    pub tx_fee_per_party: u64,
}

impl SwapAmounts {
    pub fn for_trade(trade: &Trade, config: &SwapConfig) -> Self {
        Self {
            btc_amount: trade.amount,
            bsq_trade_amount: Offer::volume(trade.amount, trade.price),
            maker_fee: config.fees.maker_fee(trade.amount),
            taker_fee: config.fees.taker_fee(trade.amount),
            tx_fee_per_party: config.tx_fee_per_party,
        }
    }

    /// BSQ burnt by the swap.
    pub fn bsq_trade_fee(&self) -> u64 {
        self.maker_fee + self.taker_fee
    }

    /// Fee of the party with the given role.
    pub fn fee_of(&self, is_maker: bool) -> u64 {
        if is_maker {
            self.maker_fee
        } else {
            self.taker_fee
        }
    }

    /// Asset and value a party must put in.
    pub fn contribution(&self, is_buyer: bool, own_fee: u64) -> (Asset, u64) {
        if is_buyer {
            (Asset::Bsq, self.bsq_trade_amount + own_fee)
        } else {
            (Asset::Btc, self.btc_amount + self.tx_fee_per_party)
        }
    }

    /// Asset a party receives.
    pub fn payout_asset(is_buyer: bool) -> Asset {
        if is_buyer {
            Asset::Btc
        } else {
            Asset::Bsq
        }
    }

    /// Payout output of a party.
    pub fn payout(
        &self,
        is_buyer: bool,
        own_fee: u64,
        address: &str,
    ) -> Result<TxOutput, ProtocolError> {
        let value = if is_buyer {
            self.btc_amount.checked_sub(self.tx_fee_per_party)
        } else {
            self.bsq_trade_amount.checked_sub(own_fee)
        };
        match value {
            Some(value) if value > 0 => Ok(TxOutput::new(
                address,
                Self::payout_asset(is_buyer),
                value,
            )),
            _ => Err(ProtocolError::Validation(format!(
                "Fees exceed the {} payout",
                if is_buyer { "BTC" } else { "BSQ" }
            ))),
        }
    }
}

/// BSQ amount range of a swap offer at `price`.
pub fn bsq_amount_range(offer: &Offer, price: u64) -> (u64, u64) {
    (
        Offer::volume(offer.min_amount, price),
        Offer::volume(offer.amount, price),
    )
}

/// Change left after `contribution` is taken from `inputs`, if any.
pub fn change_output(
    inputs: &[TxInput],
    asset: Asset,
    contribution: u64,
    address: &str,
) -> Result<Option<TxOutput>, ProtocolError> {
    if let Some(input) = inputs.iter().find(|i| i.asset != asset) {
        return Err(ProtocolError::Validation(format!(
            "Input {}:{} carries {:?}, expected {asset:?}",
            input.outpoint.tx_id, input.outpoint.index, input.asset
        )));
    }
    let total = inputs
        .iter()
        .try_fold(0u64, |acc, i| acc.checked_add(i.value))
        .ok_or_else(|| ProtocolError::Violation("input value sum overflows".to_string()))?;
    let change = total.checked_sub(contribution).ok_or_else(|| {
        ProtocolError::Validation(format!(
            "Inputs {total} do not cover contribution {contribution}"
        ))
    })?;
    Ok((change > 0).then(|| TxOutput::new(address, asset, change)))
}
