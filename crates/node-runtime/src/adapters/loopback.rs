//! # Loopback Network
//!
//! In-process peer network. Every node gets a `LoopbackBus` endpoint on a
//! shared `LoopbackNetwork`; a send hands the envelope straight to the
//! receiving endpoint's listeners.
//!
//! ```text
//! send(peer) ──→ scripted fault?      ──→ Err(SendFailed)
//!            ──→ peer unknown         ──→ Err(PeerUnreachable)
//!            ──→ peer offline         ──→ mailbox, Ok(StoredInMailbox)
//!            ──→ peer online          ──→ listeners, Ok(Arrived)
//! ```
//!
//! A node coming back online receives its mailbox in arrival order.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use px_telemetry::metric_inc;
use shared_types::ports::{ListenerId, MessageBus, MessageListener, SendOutcome};
use shared_types::{NetworkEnvelope, NetworkError, NodeAddress};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Shared medium connecting the loopback endpoints.
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: RwLock<HashMap<NodeAddress, Weak<LoopbackBus>>>,
    offline: RwLock<HashSet<NodeAddress>>,
    mailboxes: Mutex<HashMap<NodeAddress, Vec<NetworkEnvelope>>>,
    /// Scripted send failures per sender.
    faults: Mutex<HashMap<NodeAddress, VecDeque<NetworkError>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node at `address`. Replaces an earlier endpoint.
    pub fn join(self: &Arc<Self>, address: NodeAddress) -> Arc<LoopbackBus> {
        let bus = Arc::new(LoopbackBus {
            address: address.clone(),
            network: Arc::downgrade(self),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
        });
        self.endpoints
            .write()
            .insert(address.clone(), Arc::downgrade(&bus));
        info!(node = %address, "Node joined loopback network");
        bus
    }

    /// Take a node offline; messages to it go to its mailbox.
    pub fn set_offline(&self, address: &NodeAddress) {
        self.offline.write().insert(address.clone());
        debug!(node = %address, "Node offline");
    }

    /// Bring a node back online and deliver its mailbox.
    pub fn set_online(&self, address: &NodeAddress) {
        self.offline.write().remove(address);
        let stored = self.mailboxes.lock().remove(address).unwrap_or_default();
        let Some(endpoint) = self.endpoint(address) else {
            return;
        };
        debug!(node = %address, stored = stored.len(), "Node online, delivering mailbox");
        for envelope in &stored {
            endpoint.dispatch(envelope);
        }
    }

    pub fn is_online(&self, address: &NodeAddress) -> bool {
        !self.offline.read().contains(address)
    }

    /// Fail the next `count` sends of `sender`.
    pub fn fail_next_sends(&self, sender: &NodeAddress, count: usize) {
        let mut faults = self.faults.lock();
        let queue = faults.entry(sender.clone()).or_default();
        for _ in 0..count {
            queue.push_back(NetworkError::SendFailed("injected fault".to_string()));
        }
    }

    /// Messages waiting for `address`.
    pub fn mailbox_len(&self, address: &NodeAddress) -> usize {
        self.mailboxes.lock().get(address).map_or(0, Vec::len)
    }

    fn endpoint(&self, address: &NodeAddress) -> Option<Arc<LoopbackBus>> {
        self.endpoints.read().get(address).and_then(Weak::upgrade)
    }

    fn take_fault(&self, sender: &NodeAddress) -> Option<NetworkError> {
        self.faults.lock().get_mut(sender).and_then(VecDeque::pop_front)
    }

    fn route(
        &self,
        peer: &NodeAddress,
        envelope: NetworkEnvelope,
    ) -> Result<SendOutcome, NetworkError> {
        if let Some(fault) = self.take_fault(&envelope.sender) {
            return Err(fault);
        }
        let endpoint = self
            .endpoint(peer)
            .ok_or_else(|| NetworkError::PeerUnreachable {
                peer: peer.to_string(),
            })?;

        if !self.is_online(peer) {
            self.mailboxes
                .lock()
                .entry(peer.clone())
                .or_default()
                .push(envelope);
            return Ok(SendOutcome::StoredInMailbox);
        }
        endpoint.dispatch(&envelope);
        Ok(SendOutcome::Arrived)
    }
}

/// One node's endpoint on the loopback network.
pub struct LoopbackBus {
    address: NodeAddress,
    network: Weak<LoopbackNetwork>,
    listeners: RwLock<HashMap<ListenerId, Arc<dyn MessageListener>>>,
    next_listener: AtomicU64,
}

impl LoopbackBus {
    fn dispatch(&self, envelope: &NetworkEnvelope) {
        // Snapshot so listeners may (de)register while handling.
        let listeners: Vec<_> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener.on_message(envelope);
        }
    }
}

#[async_trait]
impl MessageBus for LoopbackBus {
    fn my_address(&self) -> NodeAddress {
        self.address.clone()
    }

    async fn send(
        &self,
        peer: &NodeAddress,
        envelope: NetworkEnvelope,
    ) -> Result<SendOutcome, NetworkError> {
        let network = self.network.upgrade().ok_or(NetworkError::Stopped)?;
        let name = envelope.name();
        let uid = envelope.uid;

        match network.route(peer, envelope) {
            Ok(outcome) => {
                metric_inc!(px_telemetry::MESSAGES_SENT, &[name]);
                debug!(message = name, uid = %uid, peer = %peer, outcome = ?outcome, "Message sent");
                Ok(outcome)
            }
            Err(e) => {
                metric_inc!(px_telemetry::MESSAGE_SEND_FAILURES, &[name]);
                warn!(message = name, uid = %uid, peer = %peer, error = %e, "Message send failed");
                Err(e)
            }
        }
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
