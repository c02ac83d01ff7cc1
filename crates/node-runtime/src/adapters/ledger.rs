//! # Simulated Ledger
//!
//! Chain shared by all local nodes. Transactions enter with zero
//! confirmations and gain one per mined block; `reorg` removes one again.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::ports::LedgerQuery;
use shared_types::{
    Asset, LedgerError, LedgerOutput, LedgerTx, OutPoint, TxInput, TxKind, UnsignedTx,
};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Default)]
struct Chain {
    height: u64,
    txs: HashMap<String, LedgerTx>,
    outputs: HashMap<OutPoint, LedgerOutput>,
    halted: Option<String>,
}

/// In-memory chain implementing `LedgerQuery`.
#[derive(Default)]
pub struct SimulatedLedger {
    chain: RwLock<Chain>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unspent funding output.
    pub fn add_output(&self, input: &TxInput) {
        self.chain.write().outputs.insert(
            input.outpoint.clone(),
            LedgerOutput {
                outpoint: input.outpoint.clone(),
                asset: input.asset,
                value: input.value,
                spent: false,
            },
        );
    }

    /// Record a transaction without inputs or outputs.
    pub fn add_tx(&self, tx_id: impl Into<String>, kind: TxKind) {
        let tx_id = tx_id.into();
        self.chain.write().txs.insert(
            tx_id.clone(),
            LedgerTx {
                tx_id,
                kind,
                confirmations: 0,
            },
        );
    }

    /// Accept a broadcast transaction: spend its inputs and create its
    /// outputs. Fails if an input is unknown or already spent.
    pub fn accept(&self, tx_id: &str, tx: &UnsignedTx, kind: TxKind) -> Result<(), String> {
        let mut chain = self.chain.write();
        for input in &tx.inputs {
            match chain.outputs.get(&input.outpoint) {
                Some(output) if output.spent => {
                    return Err(format!(
                        "input {}:{} already spent",
                        input.outpoint.tx_id, input.outpoint.index
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(format!(
                        "input {}:{} unknown",
                        input.outpoint.tx_id, input.outpoint.index
                    ));
                }
            }
        }

        for input in &tx.inputs {
            if let Some(output) = chain.outputs.get_mut(&input.outpoint) {
                output.spent = true;
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(tx_id, index as u32);
            chain.outputs.insert(
                outpoint.clone(),
                LedgerOutput {
                    outpoint,
                    asset: output.asset,
                    value: output.value,
                    spent: false,
                },
            );
        }
        chain.txs.insert(
            tx_id.to_string(),
            LedgerTx {
                tx_id: tx_id.to_string(),
                kind,
                confirmations: 0,
            },
        );
        debug!(tx_id, kind = ?kind, "Transaction accepted");
        Ok(())
    }

    /// Mine one block: every known transaction gains a confirmation.
    pub fn mine_block(&self) -> u64 {
        let mut chain = self.chain.write();
        chain.height += 1;
        for tx in chain.txs.values_mut() {
            tx.confirmations += 1;
        }
        chain.height
    }

    /// Drop a transaction from the chain.
    pub fn reorg(&self, tx_id: &str) -> bool {
        let removed = self.chain.write().txs.remove(tx_id).is_some();
        if removed {
            info!(tx_id, "Transaction removed by reorg");
        }
        removed
    }

    /// Make every query fail with `reason` until `resume`.
    pub fn halt(&self, reason: impl Into<String>) {
        self.chain.write().halted = Some(reason.into());
    }

    pub fn resume(&self) {
        self.chain.write().halted = None;
    }

    /// Unspent value of `asset` locked in outputs of `tx_id`.
    pub fn unspent_value(&self, tx_id: &str, asset: Asset) -> u64 {
        self.chain
            .read()
            .outputs
            .values()
            .filter(|o| o.outpoint.tx_id == tx_id && o.asset == asset && !o.spent)
            .map(|o| o.value)
            .sum()
    }

    fn check_available(chain: &Chain) -> Result<(), LedgerError> {
        match &chain.halted {
            Some(reason) => Err(LedgerError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerQuery for SimulatedLedger {
    async fn get_transaction(&self, tx_id: &str) -> Result<Option<LedgerTx>, LedgerError> {
        let chain = self.chain.read();
        Self::check_available(&chain)?;
        Ok(chain.txs.get(tx_id).cloned())
    }

    async fn get_output(&self, outpoint: &OutPoint) -> Result<Option<LedgerOutput>, LedgerError> {
        let chain = self.chain.read();
        Self::check_available(&chain)?;
        Ok(chain.outputs.get(outpoint).cloned())
    }

    async fn chain_height(&self) -> Result<u64, LedgerError> {
        let chain = self.chain.read();
        Self::check_available(&chain)?;
        Ok(chain.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TxOutput;

    fn funding(tx_id: &str, value: u64) -> TxInput {
        TxInput {
            outpoint: OutPoint::new(tx_id, 0),
            asset: Asset::Btc,
            value,
        }
    }

    fn spend(input: &TxInput) -> UnsignedTx {
        UnsignedTx {
            inputs: vec![input.clone()],
            outputs: vec![TxOutput::new("dest", Asset::Btc, input.value - 100)],
        }
    }

    #[tokio::test]
    async fn test_accept_spends_inputs_and_creates_outputs() {
        let ledger = SimulatedLedger::new();
        let input = funding("fund", 10_000);
        ledger.add_output(&input);

        ledger.accept("spend", &spend(&input), TxKind::Deposit).unwrap();

        let spent = ledger.get_output(&input.outpoint).await.unwrap().unwrap();
        assert!(spent.spent);
        let created = ledger.get_output(&OutPoint::new("spend", 0)).await.unwrap().unwrap();
        assert_eq!(created.value, 9_900);
        assert_eq!(ledger.unspent_value("spend", Asset::Btc), 9_900);
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let ledger = SimulatedLedger::new();
        let input = funding("fund", 10_000);
        ledger.add_output(&input);

        ledger.accept("first", &spend(&input), TxKind::Payout).unwrap();
        let err = ledger.accept("second", &spend(&input), TxKind::Payout).unwrap_err();
        assert!(err.contains("already spent"));
        assert!(ledger.get_transaction("second").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_input_rejected() {
        let ledger = SimulatedLedger::new();
        let err = ledger
            .accept("tx", &spend(&funding("ghost", 500)), TxKind::Other)
            .unwrap_err();
        assert!(err.contains("unknown"));
    }

    #[tokio::test]
    async fn test_mining_and_reorg() {
        let ledger = SimulatedLedger::new();
        ledger.add_tx("fee", TxKind::TradeFee);
        assert_eq!(ledger.mine_block(), 1);
        ledger.mine_block();

        let tx = ledger.get_transaction("fee").await.unwrap().unwrap();
        assert_eq!(tx.confirmations, 2);
        assert_eq!(ledger.chain_height().await.unwrap(), 2);

        assert!(ledger.reorg("fee"));
        assert!(!ledger.reorg("fee"));
        assert!(ledger.get_transaction("fee").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_halted_ledger_is_unavailable() {
        let ledger = SimulatedLedger::new();
        ledger.halt("node syncing");
        assert_eq!(
            ledger.chain_height().await,
            Err(LedgerError::Unavailable("node syncing".to_string()))
        );
        ledger.resume();
        assert!(ledger.chain_height().await.is_ok());
    }
}
