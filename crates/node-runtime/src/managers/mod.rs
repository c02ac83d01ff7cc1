//! Offer and trade bookkeeping of one node.

pub mod open_offer_manager;
pub mod trade_manager;

#[cfg(test)]
pub(crate) mod testing;

pub use open_offer_manager::OpenOfferManager;
pub use trade_manager::TradeManager;
