//! # Outbound Ports
//!
//! Capabilities the protocol engine consumes but does not implement: the
//! peer message bus, the wallet, the read-only ledger, persistence and the
//! price feed. Mock implementations for tests live at the bottom.

use crate::entities::{NodeAddress, TradeId};
use crate::envelope::NetworkEnvelope;
use crate::errors::{LedgerError, NetworkError, WalletError};
use crate::transaction::{
    Asset, InputSignature, LedgerOutput, LedgerTx, OutPoint, PartiallySignedTx, TxInput,
    TxKind, TxOutput, UnsignedTx,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// How a sent message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer received the message directly.
    Arrived,
    /// The peer was offline; the message waits in its mailbox.
    StoredInMailbox,
}

/// Handle of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives inbound messages. Must not block: forward and return.
pub trait MessageListener: Send + Sync {
    /// Called for every inbound envelope.
    fn on_message(&self, envelope: &NetworkEnvelope);
}

/// Peer-to-peer message bus with delivery acknowledgement.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Our own network address.
    fn my_address(&self) -> NodeAddress;

    /// Send an envelope to a peer.
    async fn send(
        &self,
        peer: &NodeAddress,
        envelope: NetworkEnvelope,
    ) -> Result<SendOutcome, NetworkError>;

    /// Register a listener for inbound messages.
    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// Remove a listener. Returns whether it was registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Wallet capability: builds, signs and broadcasts transactions given
/// already verified parameters.
#[async_trait]
pub trait TradeWallet: Send + Sync {
    /// Identifier of the wallet's signing key.
    fn wallet_id(&self) -> String;

    /// Create and broadcast the trade fee transaction.
    async fn create_trade_fee_tx(&self, trade_id: &TradeId, fee: u64)
        -> Result<String, WalletError>;

    /// Select unspent inputs of `asset` covering `amount`.
    async fn select_inputs(&self, asset: Asset, amount: u64) -> Result<Vec<TxInput>, WalletError>;

    /// A fresh receiving address for `asset`.
    async fn fresh_address(&self, asset: Asset) -> Result<String, WalletError>;

    /// Assemble a transaction from inputs and outputs.
    fn build_transaction(
        &self,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
    ) -> Result<UnsignedTx, WalletError> {
        if inputs.is_empty() {
            return Err(WalletError::InvalidTransaction("no inputs".to_string()));
        }
        if outputs.is_empty() {
            return Err(WalletError::InvalidTransaction("no outputs".to_string()));
        }
        if outputs.iter().any(|o| o.value == 0) {
            return Err(WalletError::InvalidTransaction(
                "zero value output".to_string(),
            ));
        }
        Ok(UnsignedTx { inputs, outputs })
    }

    /// Sign the inputs in `my_inputs`.
    async fn sign(
        &self,
        tx: PartiallySignedTx,
        my_inputs: &[OutPoint],
    ) -> Result<PartiallySignedTx, WalletError>;

    /// Broadcast a fully signed transaction. Returns its id.
    async fn broadcast(&self, tx: &PartiallySignedTx, kind: TxKind) -> Result<String, WalletError>;
}

/// Read-only ledger lookups.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Look up a transaction by id.
    async fn get_transaction(&self, tx_id: &str) -> Result<Option<LedgerTx>, LedgerError>;

    /// Look up an output.
    async fn get_output(&self, outpoint: &OutPoint) -> Result<Option<LedgerOutput>, LedgerError>;

    /// Current chain height.
    async fn chain_height(&self) -> Result<u64, LedgerError>;
}

/// Fire-and-forget durability request. Never blocks the caller.
pub trait PersistenceRequester: Send + Sync {
    /// Ask for the current state to be written out.
    fn request_persistence(&self);
}

/// Market price source.
pub trait PriceFeed: Send + Sync {
    /// Market price for `currency_code`, if known.
    fn market_price(&self, currency_code: &str) -> Option<u64>;
}

/// Deterministic signature of `signer` over one input of `tx_id`.
#[must_use]
pub fn input_signature(signer: &str, tx_id: &str, outpoint: &OutPoint) -> InputSignature {
    let mut hasher = Sha256::new();
    hasher.update(signer.as_bytes());
    hasher.update(tx_id.as_bytes());
    hasher.update(outpoint.tx_id.as_bytes());
    hasher.update(outpoint.index.to_le_bytes());
    InputSignature {
        outpoint: outpoint.clone(),
        signer: signer.to_string(),
        signature: hex::encode(hasher.finalize()),
    }
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Mock message bus recording every send.
///
/// Scripted failures are consumed one per send attempt.
#[derive(Default)]
pub struct MockMessageBus {
    address: NodeAddress,
    /// Every envelope handed to `send`, including failed attempts.
    pub sent: Mutex<Vec<(NodeAddress, NetworkEnvelope)>>,
    failures: Mutex<VecDeque<NetworkError>>,
    /// Outcome of successful sends.
    pub outcome: Mutex<Option<SendOutcome>>,
    listeners: RwLock<HashMap<ListenerId, Arc<dyn MessageListener>>>,
    next_listener: AtomicU64,
}

impl MockMessageBus {
    /// Create a bus for `address`.
    #[must_use]
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Fail the next `count` send attempts.
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(NetworkError::SendFailed("scripted failure".to_string()));
        }
    }

    /// Deliver an inbound envelope to all listeners.
    pub fn deliver(&self, envelope: &NetworkEnvelope) {
        let listeners: Vec<_> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener.on_message(envelope);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Envelopes sent so far.
    #[must_use]
    pub fn sent_envelopes(&self) -> Vec<NetworkEnvelope> {
        self.sent.lock().iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    fn my_address(&self) -> NodeAddress {
        self.address.clone()
    }

    async fn send(
        &self,
        peer: &NodeAddress,
        envelope: NetworkEnvelope,
    ) -> Result<SendOutcome, NetworkError> {
        self.sent.lock().push((peer.clone(), envelope));
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.outcome.lock().unwrap_or(SendOutcome::Arrived))
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }
}

/// Mock wallet producing synthetic inputs and deterministic signatures.
#[derive(Default)]
pub struct MockWallet {
    id: String,
    /// Extra value added to every selected input (becomes change).
    pub input_surplus: u64,
    /// Number of `sign` calls.
    pub sign_calls: AtomicUsize,
    /// Broadcast transactions.
    pub broadcasts: Mutex<Vec<(PartiallySignedTx, TxKind)>>,
    /// Error returned by the next broadcast.
    pub broadcast_error: Mutex<Option<WalletError>>,
    counter: AtomicU64,
}

impl MockWallet {
    /// Create a wallet with the given signer id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Number of `sign` calls so far.
    #[must_use]
    pub fn sign_count(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl TradeWallet for MockWallet {
    fn wallet_id(&self) -> String {
        self.id.clone()
    }

    async fn create_trade_fee_tx(
        &self,
        trade_id: &TradeId,
        fee: u64,
    ) -> Result<String, WalletError> {
        Ok(format!("fee-{}-{}-{}", self.id, trade_id.short(), fee))
    }

    async fn select_inputs(&self, asset: Asset, amount: u64) -> Result<Vec<TxInput>, WalletError> {
        let n = self.next();
        Ok(vec![TxInput {
            outpoint: OutPoint::new(format!("{}-utxo-{n}", self.id), 0),
            asset,
            value: amount + self.input_surplus,
        }])
    }

    async fn fresh_address(&self, asset: Asset) -> Result<String, WalletError> {
        let n = self.next();
        Ok(match asset {
            Asset::Btc => format!("{}-btc-{n}", self.id),
            Asset::Bsq => format!("B{}-btc-{n}", self.id),
        })
    }

    async fn sign(
        &self,
        mut tx: PartiallySignedTx,
        my_inputs: &[OutPoint],
    ) -> Result<PartiallySignedTx, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
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
        if let Some(err) = self.broadcast_error.lock().take() {
            return Err(err);
        }
        self.broadcasts.lock().push((tx.clone(), kind));
        Ok(tx.tx_id())
    }
}

/// Mock ledger backed by maps.
#[derive(Default)]
pub struct MockLedger {
    txs: RwLock<HashMap<String, LedgerTx>>,
    outputs: RwLock<HashMap<OutPoint, LedgerOutput>>,
    height: AtomicU64,
}

impl MockLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a transaction.
    pub fn insert_tx(&self, tx_id: impl Into<String>, kind: TxKind, confirmations: u32) {
        let tx_id = tx_id.into();
        self.txs.write().insert(
            tx_id.clone(),
            LedgerTx {
                tx_id,
                kind,
                confirmations,
            },
        );
    }

    /// Remove a transaction (reorg).
    pub fn remove_tx(&self, tx_id: &str) {
        self.txs.write().remove(tx_id);
    }

    /// Register an unspent output matching `input`.
    pub fn insert_input(&self, input: &TxInput) {
        self.outputs.write().insert(
            input.outpoint.clone(),
            LedgerOutput {
                outpoint: input.outpoint.clone(),
                asset: input.asset,
                value: input.value,
                spent: false,
            },
        );
    }

    /// Set the chain height.
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }
}

#[async_trait]
impl LedgerQuery for MockLedger {
    async fn get_transaction(&self, tx_id: &str) -> Result<Option<LedgerTx>, LedgerError> {
        Ok(self.txs.read().get(tx_id).cloned())
    }

    async fn get_output(&self, outpoint: &OutPoint) -> Result<Option<LedgerOutput>, LedgerError> {
        Ok(self.outputs.read().get(outpoint).cloned())
    }

    async fn chain_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height.load(Ordering::Relaxed))
    }
}

/// Persistence requester counting requests.
#[derive(Default)]
pub struct RecordingPersistence {
    requests: AtomicUsize,
}

impl RecordingPersistence {
    /// Number of requests so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PersistenceRequester for RecordingPersistence {
    fn request_persistence(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Price feed with fixed prices.
#[derive(Default)]
pub struct StaticPriceFeed {
    prices: RwLock<HashMap<String, u64>>,
}

impl StaticPriceFeed {
    /// Set the price for `currency_code`.
    pub fn set(&self, currency_code: &str, price: u64) {
        self.prices.write().insert(currency_code.to_string(), price);
    }
}

impl PriceFeed for StaticPriceFeed {
    fn market_price(&self, currency_code: &str) -> Option<u64> {
        self.prices.read().get(currency_code).copied()
    }
}
