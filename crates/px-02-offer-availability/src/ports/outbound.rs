//! Driven Ports (outbound dependencies of the handshake)

use crate::domain::OpenOffer;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{NodeAddress, Offer, OfferId};
use std::collections::{HashMap, HashSet};

/// Resolves the network address the maker of an offer is reachable at.
#[async_trait]
pub trait PeerAddressResolver: Send + Sync {
    /// The maker's current address, if known.
    async fn resolve(&self, offer: &Offer) -> Option<NodeAddress>;
}

/// Resolver that trusts the address published with the offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfferOwnerResolver;

#[async_trait]
impl PeerAddressResolver for OfferOwnerResolver {
    async fn resolve(&self, offer: &Offer) -> Option<NodeAddress> {
        (!offer.owner.host.is_empty()).then(|| offer.owner.clone())
    }
}

/// Maker's book of published offers.
pub trait OpenOfferBook: Send + Sync {
    /// Snapshot of an offer this node published.
    fn open_offer(&self, offer_id: &OfferId) -> Option<OpenOffer>;
}

/// Chooses the dispute agents assigned to a new trade.
pub trait DisputeAgentSelector: Send + Sync {
    /// Mediator for the first escalation level.
    fn select_mediator(&self) -> Option<NodeAddress>;

    /// Refund agent for the second escalation level.
    fn select_refund_agent(&self) -> Option<NodeAddress>;
}

/// The user's ignore list.
pub trait PeerFilter: Send + Sync {
    /// Whether trades with `peer` are refused.
    fn is_ignored(&self, peer: &NodeAddress) -> bool;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Fixed set of dispute agents.
#[derive(Debug, Default, Clone)]
pub struct StaticAgents {
    /// Mediator.
    pub mediator: Option<NodeAddress>,
    /// Refund agent.
    pub refund_agent: Option<NodeAddress>,
}

impl DisputeAgentSelector for StaticAgents {
    fn select_mediator(&self) -> Option<NodeAddress> {
        self.mediator.clone()
    }

    fn select_refund_agent(&self) -> Option<NodeAddress> {
        self.refund_agent.clone()
    }
}

/// Ignore list held in memory.
#[derive(Debug, Default)]
pub struct IgnoreList {
    peers: RwLock<HashSet<NodeAddress>>,
}

impl IgnoreList {
    /// Refuse trades with `peer`.
    pub fn ignore(&self, peer: NodeAddress) {
        self.peers.write().insert(peer);
    }
}

impl PeerFilter for IgnoreList {
    fn is_ignored(&self, peer: &NodeAddress) -> bool {
        self.peers.read().contains(peer)
    }
}

/// Open offer book held in memory. For tests.
#[derive(Debug, Default)]
pub struct MockOfferBook {
    offers: RwLock<HashMap<OfferId, OpenOffer>>,
}

impl MockOfferBook {
    /// Publish `offer`.
    pub fn add(&self, open_offer: OpenOffer) {
        self.offers.write().insert(open_offer.offer.id, open_offer);
    }
}

impl OpenOfferBook for MockOfferBook {
    fn open_offer(&self, offer_id: &OfferId) -> Option<OpenOffer> {
        self.offers.read().get(offer_id).cloned()
    }
}
