//! Mock-backed services for protocol tests.
//!
//! Enable with the `test-utils` feature flag.

use crate::config::ProtocolConfig;
use crate::domain::{ProcessModel, ProtocolServices};
use crate::flow::ProtocolTask;
use px_01_task_runner::{Task, TaskRunner};
use shared_bus::RecordingPublisher;
use shared_crypto::KeyRing;
use shared_types::ports::{
    MockLedger, MockMessageBus, MockWallet, RecordingPersistence, TradeWallet,
};
use shared_types::{ExchangeMessage, NetworkEnvelope, NodeAddress, ProtocolError};
use std::sync::Arc;

/// Mocks behind a `ProtocolServices`, kept typed for assertions.
pub struct Harness {
    pub bus: Arc<MockMessageBus>,
    pub wallet: Arc<MockWallet>,
    pub ledger: Arc<MockLedger>,
    pub persistence: Arc<RecordingPersistence>,
    pub events: Arc<RecordingPublisher>,
    pub key_ring: Arc<KeyRing>,
}

impl Harness {
    pub fn new(host: &str, seed: u8) -> Self {
        Self {
            bus: Arc::new(MockMessageBus::new(NodeAddress::new(host, 9999))),
            wallet: Arc::new(MockWallet::new(host)),
            ledger: Arc::new(MockLedger::new()),
            persistence: Arc::new(RecordingPersistence::default()),
            events: Arc::new(RecordingPublisher::new()),
            key_ring: Arc::new(KeyRing::from_seed([seed; 32])),
        }
    }

    pub fn services(&self) -> ProtocolServices {
        ProtocolServices {
            bus: self.bus.clone(),
            wallet: self.wallet.clone(),
            ledger: self.ledger.clone(),
            persistence: self.persistence.clone(),
            events: self.events.clone(),
            key_ring: self.key_ring.clone(),
            account_id: format!("{}-account", self.wallet.wallet_id()),
            config: ProtocolConfig::default(),
        }
    }
}

/// Run `task` alone against `model` and return its own error.
pub async fn run_task(
    model: &mut ProcessModel,
    task: impl Task<ProcessModel, ProtocolError> + 'static,
) -> Result<(), ProtocolError> {
    let tasks: Vec<ProtocolTask> = vec![Box::new(task)];
    TaskRunner::new("test", tasks)
        .run(model)
        .await
        .map(|_| ())
        .map_err(|fault| {
            fault
                .into_task_error()
                .unwrap_or_else(|| ProtocolError::Violation("task limit exceeded".to_string()))
        })
}

/// Set `message` from `peer` as the model's trigger.
pub fn deliver_trigger(model: &mut ProcessModel, peer: &str, message: ExchangeMessage) {
    model.trigger = Some(NetworkEnvelope::new(NodeAddress::new(peer, 9999), message));
}
