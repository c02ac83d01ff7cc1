//! # Trade Contract
//!
//! Both parties build the contract independently from locally known and
//! peer-supplied fields and sign its canonical form. Only the canonical
//! bytes are signed, so two contracts agree iff their canonical bytes do.

use crate::entities::{NodeAddress, OfferId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable summary of the agreed trade terms.
///
/// Field order is part of the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub offer_id: OfferId,
    pub trade_amount: u64,
    pub trade_price: u64,
    pub taker_fee_tx_id: String,
    pub buyer_address: NodeAddress,
    pub seller_address: NodeAddress,
    pub is_buyer_maker_and_seller_taker: bool,
    pub maker_account_id: String,
    pub taker_account_id: String,
    pub payment_method_id: String,
    /// Maker signing public key (hex).
    pub maker_signing_pub_key: String,
    /// Taker signing public key (hex).
    pub taker_signing_pub_key: String,
    pub buyer_payout_address: String,
    pub seller_payout_address: String,
}

impl Contract {
    /// Canonical byte form: compact JSON in field declaration order.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// SHA-256 of the canonical form, hex encoded.
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        let bytes = self.canonical_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
