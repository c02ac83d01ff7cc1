//! # Simulated Wallet
//!
//! Funds live as balances per asset. Selecting inputs carves a funding
//! output of the requested value out of the balance and registers it on
//! the shared ledger, so peers can verify it. Broadcasts go through the
//! ledger's spend checks.

use async_trait::async_trait;
use bitcoin::Network;
use parking_lot::Mutex;
use px_04_bsq_swap::scripted_address;
use shared_types::ports::{input_signature, TradeWallet};
use shared_types::{
    Asset, OutPoint, PartiallySignedTx, TradeId, TxInput, TxKind, WalletError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::ledger::SimulatedLedger;

/// Wallet of one local node on a `SimulatedLedger`.
pub struct SimulatedWallet {
    id: String,
    network: Network,
    ledger: Arc<SimulatedLedger>,
    balances: Mutex<HashMap<Asset, u64>>,
    counter: AtomicU64,
}

impl SimulatedWallet {
    pub fn new(id: impl Into<String>, network: Network, ledger: Arc<SimulatedLedger>) -> Self {
        Self {
            id: id.into(),
            network,
            ledger,
            balances: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Credit `amount` of `asset`.
    pub fn fund(&self, asset: Asset, amount: u64) {
        *self.balances.lock().entry(asset).or_default() += amount;
        info!(wallet = %self.id, asset = ?asset, amount, "Wallet funded");
    }

    pub fn balance(&self, asset: Asset) -> u64 {
        self.balances.lock().get(&asset).copied().unwrap_or(0)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl TradeWallet for SimulatedWallet {
    fn wallet_id(&self) -> String {
        self.id.clone()
    }

    async fn create_trade_fee_tx(&self, trade_id: &TradeId, fee: u64) -> Result<String, WalletError> {
        {
            let mut balances = self.balances.lock();
            let available = balances.get(&Asset::Btc).copied().unwrap_or(0);
            if available < fee {
                return Err(WalletError::InsufficientFunds {
                    needed: fee,
                    available,
                });
            }
            balances.insert(Asset::Btc, available - fee);
        }
        let tx_id = format!("fee-{}-{}-{}", self.id, trade_id.short(), self.next());
        self.ledger.add_tx(tx_id.clone(), TxKind::TradeFee);
        debug!(trade_id = %trade_id, tx_id = %tx_id, fee, "Trade fee tx published");
        Ok(tx_id)
    }

    async fn select_inputs(&self, asset: Asset, amount: u64) -> Result<Vec<TxInput>, WalletError> {
        {
            let mut balances = self.balances.lock();
            let available = balances.get(&asset).copied().unwrap_or(0);
            if available < amount {
                return Err(WalletError::InsufficientFunds {
                    needed: amount,
                    available,
                });
            }
            balances.insert(asset, available - amount);
        }
        let input = TxInput {
            outpoint: OutPoint::new(format!("{}-utxo-{}", self.id, self.next()), 0),
            asset,
            value: amount,
        };
        self.ledger.add_output(&input);
        Ok(vec![input])
    }

    async fn fresh_address(&self, asset: Asset) -> Result<String, WalletError> {
        let seed = format!("{}-{}", self.id, self.next());
        Ok(scripted_address(seed.as_bytes(), asset, self.network))
    }

    async fn sign(
        &self,
        mut tx: PartiallySignedTx,
        my_inputs: &[OutPoint],
    ) -> Result<PartiallySignedTx, WalletError> {
        let tx_id = tx.tx_id();
        for outpoint in my_inputs {
            if !tx.tx.spends(outpoint) {
                return Err(WalletError::SigningFailed(format!(
                    "input {}:{} not in transaction",
                    outpoint.tx_id, outpoint.index
                )));
            }
            tx.add_signature(input_signature(&self.id, &tx_id, outpoint));
        }
        Ok(tx)
    }

    async fn broadcast(&self, tx: &PartiallySignedTx, kind: TxKind) -> Result<String, WalletError> {
        let tx_id = tx.tx_id();
        self.ledger
            .accept(&tx_id, &tx.tx, kind)
            .map_err(WalletError::BroadcastFailed)?;
        info!(wallet = %self.id, tx_id = %tx_id, kind = ?kind, "Transaction broadcast");
        Ok(tx_id)
    }
}
