//! Ports module for the availability handshake

pub mod outbound;

pub use outbound::{
    DisputeAgentSelector, IgnoreList, MockOfferBook, OfferOwnerResolver, OpenOfferBook,
    PeerAddressResolver, PeerFilter, StaticAgents,
};
