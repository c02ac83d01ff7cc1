//! Node-level errors

use crate::adapters::PersistenceError;
use crate::container::ConfigError;
use px_02_offer_availability::AvailabilityError;
use px_05_dispute::DisputeError;
use shared_types::{AvailabilityResult, OfferId, ProtocolError, TradeId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Offer {offer_id} is not available: {result:?}")]
    OfferNotAvailable {
        offer_id: OfferId,
        result: AvailabilityResult,
    },

    #[error("Amount {amount} outside the range of offer {offer_id}")]
    AmountOutOfRange { offer_id: OfferId, amount: u64 },

    #[error("No price for offer {0}")]
    PriceUnavailable(OfferId),

    #[error("Trade {0} already exists")]
    TradeExists(TradeId),

    #[error("Trade {0} not found")]
    TradeNotFound(TradeId),

    #[error("Message {0} is not routed to trades")]
    UnroutableMessage(&'static str),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Dispute(#[from] DisputeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
