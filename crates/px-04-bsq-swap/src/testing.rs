//! Test wallet whose inputs exist on a shared ledger and whose addresses
//! decode on testnet.

use crate::domain::scripted_address;
use async_trait::async_trait;
use bitcoin::Network;
use px_03_trade_protocol::test_utils::Harness;
use px_03_trade_protocol::ProtocolServices;
use shared_types::ports::{MockLedger, MockWallet, TradeWallet};
use shared_types::{
    Asset, OutPoint, PartiallySignedTx, TradeId, TxInput, TxKind, WalletError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) struct ChainWallet {
    pub inner: Arc<MockWallet>,
    ledger: Arc<MockLedger>,
    addresses: AtomicU32,
}

#[async_trait]
impl TradeWallet for ChainWallet {
    fn wallet_id(&self) -> String {
        self.inner.wallet_id()
    }

    async fn create_trade_fee_tx(&self, trade_id: &TradeId, fee: u64) -> Result<String, WalletError> {
        self.inner.create_trade_fee_tx(trade_id, fee).await
    }

    async fn select_inputs(&self, asset: Asset, amount: u64) -> Result<Vec<TxInput>, WalletError> {
        let inputs = self.inner.select_inputs(asset, amount).await?;
        for input in &inputs {
            self.ledger.insert_input(input);
        }
        Ok(inputs)
    }

    async fn fresh_address(&self, asset: Asset) -> Result<String, WalletError> {
        let n = self.addresses.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{}-{n}", self.inner.wallet_id());
        Ok(scripted_address(seed.as_bytes(), asset, Network::Testnet))
    }

    async fn sign(
        &self,
        tx: PartiallySignedTx,
        my_inputs: &[OutPoint],
    ) -> Result<PartiallySignedTx, WalletError> {
        self.inner.sign(tx, my_inputs).await
    }

    async fn broadcast(&self, tx: &PartiallySignedTx, kind: TxKind) -> Result<String, WalletError> {
        let tx_id = self.inner.broadcast(tx, kind).await?;
        self.ledger.insert_tx(tx_id.clone(), kind, 0);
        Ok(tx_id)
    }
}

/// One swap party: mocks plus a chain wallet on the shared ledger.
pub(crate) struct SwapParty {
    pub harness: Harness,
    pub wallet: Arc<ChainWallet>,
}

impl SwapParty {
    pub fn new(host: &str, seed: u8, ledger: &Arc<MockLedger>) -> Self {
        let harness = Harness {
            ledger: ledger.clone(),
            ..Harness::new(host, seed)
        };
        let wallet = Arc::new(ChainWallet {
            inner: harness.wallet.clone(),
            ledger: ledger.clone(),
            addresses: AtomicU32::new(0),
        });
        Self { harness, wallet }
    }

    pub fn services(&self) -> ProtocolServices {
        let mut services = self.harness.services();
        services.wallet = self.wallet.clone();
        services
    }
}
