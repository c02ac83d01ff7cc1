//! Ports module for dispute escalation

pub mod outbound;

pub use outbound::{MockOpenOffers, MockTradeRegistry, OpenOfferRegistry, TradeRegistry};
