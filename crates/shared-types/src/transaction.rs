//! # Transactions
//!
//! Protocol-level view of on-chain transactions: inputs and outputs tagged
//! with the asset they carry (BSQ is colored BTC), plus partial signatures
//! collected from the parties.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Asset carried by an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Btc,
    Bsq,
}

/// Reference to a previous transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: String,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }
}

/// A spendable input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub asset: Asset,
    pub value: u64,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub asset: Asset,
    pub value: u64,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, asset: Asset, value: u64) -> Self {
        Self {
            address: address.into(),
            asset,
            value,
        }
    }
}

/// Transaction skeleton as built by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl UnsignedTx {
    /// Transaction id: SHA-256 over inputs and outputs.
    #[must_use]
    pub fn tx_id(&self) -> String {
        let mut hasher = Sha256::new();
        for input in &self.inputs {
            hasher.update(input.outpoint.tx_id.as_bytes());
            hasher.update(input.outpoint.index.to_le_bytes());
            hasher.update(input.value.to_le_bytes());
        }
        for output in &self.outputs {
            hasher.update(output.address.as_bytes());
            hasher.update([output.asset as u8]);
            hasher.update(output.value.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Sum of input values of `asset`, `None` on overflow.
    #[must_use]
    pub fn input_sum(&self, asset: Asset) -> Option<u64> {
        self.inputs
            .iter()
            .filter(|i| i.asset == asset)
            .try_fold(0u64, |acc, i| acc.checked_add(i.value))
    }

    /// Sum of output values of `asset`, `None` on overflow.
    #[must_use]
    pub fn output_sum(&self, asset: Asset) -> Option<u64> {
        self.outputs
            .iter()
            .filter(|o| o.asset == asset)
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Whether `outpoint` is spent by this transaction.
    #[must_use]
    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| &i.outpoint == outpoint)
    }

    /// Index of the first output paying exactly `value` of `asset` to `address`.
    #[must_use]
    pub fn find_output(&self, address: &str, asset: Asset, value: u64) -> Option<u32> {
        self.outputs
            .iter()
            .position(|o| o.address == address && o.asset == asset && o.value == value)
            .map(|i| i as u32)
    }
}

/// A signature over one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature {
    pub outpoint: OutPoint,
    /// Identifier of the signing key.
    pub signer: String,
    pub signature: String,
}

/// A transaction with the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartiallySignedTx {
    pub tx: UnsignedTx,
    pub signatures: Vec<InputSignature>,
}

impl PartiallySignedTx {
    pub fn new(tx: UnsignedTx) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    /// Transaction id of the underlying transaction.
    #[must_use]
    pub fn tx_id(&self) -> String {
        self.tx.tx_id()
    }

    /// Number of signatures present for `outpoint`.
    #[must_use]
    pub fn signature_count(&self, outpoint: &OutPoint) -> usize {
        self.signatures
            .iter()
            .filter(|s| &s.outpoint == outpoint)
            .count()
    }

    /// Add a signature, ignoring an identical one already present.
    pub fn add_signature(&mut self, signature: InputSignature) {
        if !self.signatures.contains(&signature) {
            self.signatures.push(signature);
        }
    }
}

/// What a transaction is used for, as seen by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    TradeFee,
    Deposit,
    Payout,
    Swap,
    Other,
}

/// A transaction known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTx {
    pub tx_id: String,
    pub kind: TxKind,
    pub confirmations: u32,
}

/// An output known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutput {
    pub outpoint: OutPoint,
    pub asset: Asset,
    pub value: u64,
    pub spent: bool,
}
