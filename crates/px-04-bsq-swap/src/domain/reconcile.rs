//! Value conservation check run by both parties before signing.

use shared_types::{Asset, ProtocolError, UnsignedTx};

/// Balances of a reconciled swap transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapBalance {
    pub bsq_in: u64,
    pub bsq_out: u64,
    /// BTC inputs plus the burnt BSQ trade fee.
    pub btc_in: u64,
    pub btc_out: u64,
    /// Mining fee left to the network.
    pub tx_fee: u64,
}

/// Check that `tx` conserves value.
///
/// The BSQ consumed must equal `bsq_trade_fee` exactly. The burnt fee
/// counts towards the BTC side, which must not pay out more than it takes.
pub fn reconcile(tx: &UnsignedTx, bsq_trade_fee: u64) -> Result<SwapBalance, ProtocolError> {
    let bsq_in = checked_sum(tx.input_sum(Asset::Bsq), "BSQ input")?;
    let bsq_out = checked_sum(tx.output_sum(Asset::Bsq), "BSQ output")?;
    let mismatch = ProtocolError::BalanceMismatch {
        bsq_in,
        bsq_out,
        bsq_trade_fee,
    };
    match bsq_in.checked_sub(bsq_out) {
        Some(burnt) if burnt == bsq_trade_fee => {}
        _ => return Err(mismatch),
    }

    let btc_in = checked_sum(
        tx.input_sum(Asset::Btc)
            .and_then(|sum| sum.checked_add(bsq_trade_fee)),
        "BTC input",
    )?;
    let btc_out = checked_sum(tx.output_sum(Asset::Btc), "BTC output")?;
    let tx_fee = btc_in
        .checked_sub(btc_out)
        .ok_or(ProtocolError::NegativeTxFee { btc_in, btc_out })?;

    Ok(SwapBalance {
        bsq_in,
        bsq_out,
        btc_in,
        btc_out,
        tx_fee,
    })
}

fn checked_sum(sum: Option<u64>, what: &str) -> Result<u64, ProtocolError> {
    sum.ok_or_else(|| ProtocolError::Violation(format!("{what} sum overflows")))
}
