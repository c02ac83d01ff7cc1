//! Settlement address decoding.
//!
//! BSQ addresses are BTC addresses with a `B` prefix.

use bitcoin::util::address::Address;
use bitcoin::Network;
use shared_types::{Asset, ProtocolError};
use std::str::FromStr;

const BSQ_PREFIX: char = 'B';

/// Decode `address`, returning the asset it receives.
///
/// The `B`-prefixed form is tried first so that an uppercase bech32 BTC
/// address still falls through to the BTC branch.
pub fn decode_settlement_address(address: &str, network: Network) -> Result<Asset, ProtocolError> {
    if let Some(inner) = address.strip_prefix(BSQ_PREFIX) {
        if let Ok(decoded) = Address::from_str(inner) {
            check_network(address, &decoded, network)?;
            return Ok(Asset::Bsq);
        }
    }
    let decoded = Address::from_str(address).map_err(|e| ProtocolError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    check_network(address, &decoded, network)?;
    Ok(Asset::Btc)
}

/// Decode `address` and require it to receive `expected`.
pub fn verify_settlement_address(
    address: &str,
    expected: Asset,
    network: Network,
) -> Result<(), ProtocolError> {
    let asset = decode_settlement_address(address, network)?;
    if asset != expected {
        return Err(ProtocolError::InvalidAddress {
            address: address.to_string(),
            reason: format!("expected a {expected:?} address, got {asset:?}"),
        });
    }
    Ok(())
}

fn check_network(raw: &str, decoded: &Address, network: Network) -> Result<(), ProtocolError> {
    if is_compatible(decoded.network, network) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidAddress {
            address: raw.to_string(),
            reason: format!("address is for {:?}, expected {:?}", decoded.network, network),
        })
    }
}

// Legacy testnet encodings are shared by testnet, signet and regtest.
fn is_compatible(actual: Network, expected: Network) -> bool {
    match expected {
        Network::Bitcoin => actual == Network::Bitcoin,
        _ => actual != Network::Bitcoin,
    }
}

/// Deterministic P2WSH address for `seed`, used by local wallets and tests.
#[must_use]
pub fn scripted_address(seed: &[u8], asset: Asset, network: Network) -> String {
    let script = bitcoin::Script::from(seed.to_vec());
    let address = Address::p2wsh(&script, network).to_string();
    match asset {
        Asset::Btc => address,
        Asset::Bsq => format!("{BSQ_PREFIX}{address}"),
    }
}
